use redseq_cal::background::ConstantBackground;
use redseq_cal::calib::Calibrator;
use redseq_cal::data::{SimulationConfig, simulate};
use redseq_cal::domain::CalibConfig;

/// Flat red sequence at color 1.0 with 0.05 intrinsic scatter over [0.1, 0.3].
fn flat_sequence() -> (SimulationConfig, CalibConfig) {
    let sim = SimulationConfig {
        seed: 2024,
        nmag: 2,
        ref_ind: 0,
        zrange: [0.1, 0.3],
        n_members: 1500,
        n_field: 0,
        intercept: vec![1.0],
        z_slope: vec![0.0],
        tilt: 0.0,
        scatter: 0.05,
        mag_err: 0.005,
        ..SimulationConfig::default()
    };
    let mut cfg = CalibConfig::for_bands(2, 0);
    cfg.zrange = [0.1, 0.3];
    cfg.calib_color_nodesizes = vec![0.05];
    (sim, cfg)
}

#[test]
fn flat_sequence_is_recovered_on_five_nodes() {
    let (sim, cfg) = flat_sequence();
    let sample = simulate(&sim).unwrap();
    let bkg = ConstantBackground { density: 0.01 };
    let out = Calibrator::new(&cfg, &bkg).unwrap().run(&sample).unwrap();

    let curves = &out.table.colors[0];
    assert_eq!(curves.mean_z.len(), 5);
    for (z, want) in curves.mean_z.iter().zip([0.1, 0.15, 0.2, 0.25, 0.3]) {
        assert!((z - want).abs() < 1e-9);
    }
    for m in &curves.mean {
        assert!((m - 1.0).abs() < 0.1, "mean node {m}");
    }
    for s in out.table.scatter(0) {
        assert!((s - 0.05).abs() < 0.025, "scatter node {s}");
    }
    assert_eq!(out.zreds.len(), out.sample.len());
}

#[test]
fn scatter_and_color_survive_a_field_population() {
    let (mut sim, cfg) = flat_sequence();
    sim.n_field = 500;
    let sample = simulate(&sim).unwrap();
    let bkg = redseq_cal::background::FieldBackground::estimate(&sample, &sample.pmem, 0.5).unwrap();
    let out = Calibrator::new(&cfg, &bkg).unwrap().run(&sample).unwrap();
    for m in &out.table.colors[0].mean {
        assert!((m - 1.0).abs() < 0.1, "mean node {m}");
    }
}
