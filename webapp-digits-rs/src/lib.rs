//file: lib.rs
// desc: in-browser handwritten digit recognizer

use leptos::*;
use wasm_bindgen::prelude::*;

pub mod canvas;
pub mod error;
pub mod inference;
pub mod model;
pub mod preprocess;
mod web;

pub use web::App;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AppConfig {
    /// Served path of the bincode `DigitNet` record.
    pub model_url: &'static str,
    /// After this long without a loaded model the recognizer reports itself unavailable.
    pub load_timeout_ms: u32,
    pub log_level: log::Level,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model_url: "/model/digit_net.bin",
            load_timeout_ms: 15_000,
            log_level: log::Level::Debug,
        }
    }
}

#[wasm_bindgen(start)]
pub fn main() {
    console_error_panic_hook::set_once();
    let config = AppConfig::default();
    console_log::init_with_level(config.log_level).ok();

    leptos::mount_to_body(move || view! { <App config=config/> });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_points_at_model_artifact() {
        let config = AppConfig::default();
        assert_eq!(config.model_url, "/model/digit_net.bin");
        assert!(config.load_timeout_ms > 0);
    }
}
