use redseq_cal::background::FieldBackground;
use redseq_cal::calib::{CalibrationOutput, Calibrator};
use redseq_cal::data::{SimulationConfig, simulate};
use redseq_cal::domain::CalibConfig;
use redseq_cal::io::table_to_json;

fn run_once() -> CalibrationOutput {
    let sim = SimulationConfig {
        n_members: 800,
        n_field: 200,
        ..SimulationConfig::default()
    };
    let sample = simulate(&sim).unwrap();
    let bkg = FieldBackground::estimate(&sample, &sample.pmem, 0.3).unwrap();
    let cfg = CalibConfig::for_bands(sim.nmag, sim.ref_ind);
    Calibrator::new(&cfg, &bkg).unwrap().run(&sample).unwrap()
}

#[test]
fn identical_input_gives_identical_tables() {
    let a = run_once();
    let b = run_once();
    assert_eq!(table_to_json(&a.table), table_to_json(&b.table));

    assert_eq!(a.zreds.len(), b.zreds.len());
    for (x, y) in a.zreds.iter().zip(&b.zreds) {
        assert_eq!(x.zred.to_bits(), y.zred.to_bits());
        assert_eq!(x.zred2_e.to_bits(), y.zred2_e.to_bits());
    }
}
