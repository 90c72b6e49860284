use std::process::ExitCode;

fn main() -> ExitCode {
    redseq_cal::logging::init_tracing();
    match redseq_cal::app::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::from(err.exit_code())
        }
    }
}
