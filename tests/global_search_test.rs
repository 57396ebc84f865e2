use mulens::fits::de::DeFit;
use mulens::fits::lm::LmFit;
use mulens::magnification::b0b1_table::B0B1Table;
use mulens::models::parameters::{FluxParameters, ModelConfig, ModelKind};
use mulens::models::MicrolensModel;
use rand::rngs::StdRng;
use rand::SeedableRng;

mod common;

const TRUTH: [f64; 5] = [2457500.0, 0.1, 20.0, 2.0, 0.0];

/// Global search followed by local refinement, with estimated fluxes so that
/// the search space reduces to `(to, uo, tE)`.
#[test]
fn test_de_then_lm_pipeline() {
    let event = common::pspl_event(&TRUTH, 150, 30.0, 0.02, None);
    let model = MicrolensModel::new(
        event,
        ModelConfig::new(ModelKind::Pspl).with_flux_parameters(FluxParameters::Estimated),
        B0B1Table::embedded(),
    )
    .unwrap();

    let mut rng = StdRng::seed_from_u64(123);
    let mut search = DeFit::new(&model);
    search.max_iterations = 80;
    let coarse = search.fit(&mut rng).unwrap();

    // Coarse landing inside the basin.
    assert!((coarse.parameters[0] - TRUTH[0]).abs() < 1.0);
    assert!((coarse.parameters[2] - TRUTH[2]).abs() < 5.0);
    assert!(coarse.covariance.is_none());
    assert!(coarse.population.is_some());

    let refined = LmFit::new(&model).fit(&coarse.parameters).unwrap();
    assert!(refined.objective < 1e-6, "chi2 = {}", refined.objective);
    assert!((refined.parameters[0] - TRUTH[0]).abs() < 1e-3);
    assert!((refined.parameters[1] - TRUTH[1]).abs() / TRUTH[1] < 0.01);
    assert!((refined.parameters[2] - TRUTH[2]).abs() / TRUTH[2] < 0.01);

    // The refined fluxes are recovered by the estimation, not by the search.
    let params = model.resolve(&refined.parameters).unwrap();
    let telescope = &model.event().telescopes[0];
    let (amplification, _) = model.magnification(telescope, &params).unwrap();
    let (fs, fb) = model.estimate_fluxes(telescope, &amplification).unwrap();
    assert!((fs - TRUTH[3]).abs() / TRUTH[3] < 0.01, "fs = {fs}");
    assert!(fb.abs() < 0.02, "fb = {fb}");
}
