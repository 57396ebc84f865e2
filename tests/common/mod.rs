#![allow(dead_code)]

use mulens::event::Event;
use mulens::magnification::pspl_magnification_scalar;
use mulens::telescopes::{Site, Telescope};
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

/// PSPL model flux at time `t` for `(to, uo, tE, fs, g)`.
pub fn pspl_flux(t: f64, to: f64, uo: f64, te: f64, fs: f64, g: f64) -> f64 {
    let u = ((t - to) / te).hypot(uo);
    fs * pspl_magnification_scalar(u) + fs * g
}

/// Simulated PSPL light curve on a uniform grid of `n` points over
/// `[to - half_window, to + half_window]`, with optional Gaussian flux noise.
pub fn pspl_lightcurve(
    truth: &[f64; 5],
    n: usize,
    half_window: f64,
    sigma: f64,
    rng: Option<&mut StdRng>,
) -> Vec<[f64; 3]> {
    let [to, uo, te, fs, g] = *truth;
    let mut points: Vec<[f64; 3]> = (0..n)
        .map(|i| {
            let t = to - half_window + 2.0 * half_window * i as f64 / (n - 1) as f64;
            [t, pspl_flux(t, to, uo, te, fs, g), sigma]
        })
        .collect();
    if let Some(rng) = rng {
        let normal = Normal::new(0.0, sigma).unwrap();
        for point in &mut points {
            point[1] += normal.sample(rng);
        }
    }
    points
}

/// Single-telescope event around a simulated PSPL curve.
pub fn pspl_event(
    truth: &[f64; 5],
    n: usize,
    half_window: f64,
    sigma: f64,
    rng: Option<&mut StdRng>,
) -> Event {
    let mut event = Event::new("OB150001", 269.5, -28.1);
    event.add_telescope(
        Telescope::new(
            "OGLE",
            Site::Earth,
            &pspl_lightcurve(truth, n, half_window, sigma, rng),
            0.0,
        )
        .unwrap(),
    );
    event
}
