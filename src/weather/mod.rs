pub mod client;
pub mod store;

pub use client::{CurrentConditions, ForecastDetail, WeatherAlert, WeatherClient};
pub use store::{run_weather_loop, WeatherStore};
