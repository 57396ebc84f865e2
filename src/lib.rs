pub mod constants;
pub mod event;
pub mod fits;
pub mod magnification;
pub mod models;
pub mod mulens_errors;
pub mod parallax;
pub mod telescopes;
pub mod time;
