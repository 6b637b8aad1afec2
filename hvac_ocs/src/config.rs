// Command line interface + layered file config (the Config/Tariff
// component of `spec.md` §2). Bit-exact defaults per `spec.md` §6.
use anyhow::Result;
use clap::Parser;
use hvac_protocol::Mode;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// K: max concurrently served rooms.
    pub max_service: usize,
    /// K_time: real-seconds -> sim-seconds scale.
    pub time_scale: f64,
    /// TIME_SLICE, in sim-seconds.
    pub time_slice_s: f64,
    /// RECOVER_RATE, degrees per minute, for unserved drift.
    pub recover_rate_per_min: f64,
    /// Fixed real-time cadence of the simulation tick (STEP).
    pub tick_step: Duration,
    pub initial_mode: Mode,
    pub log_dir: PathBuf,
    pub room_ids: Vec<String>,
}

impl Config {
    pub fn hysteresis_band(&self) -> f64 {
        1.0
    }

    pub fn epsilon(&self) -> f64 {
        0.001
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "hvac_ocs", about = "Central air-conditioning scheduler simulator")]
pub struct Cli {
    /// Optional TOML file layered under the CLI defaults (config crate).
    #[arg(long)]
    pub config_file: Option<PathBuf>,

    #[arg(long, default_value_t = 3)]
    pub max_service: usize,

    #[arg(long, default_value_t = 6.0)]
    pub time_scale: f64,

    #[arg(long, default_value_t = 120.0)]
    pub time_slice_s: f64,

    #[arg(long, default_value_t = 0.5)]
    pub recover_rate_per_min: f64,

    #[arg(long, default_value_t = 300)]
    pub tick_step_ms: u64,

    #[arg(long, default_value = "cool")]
    pub mode: String,

    #[arg(long, default_value = "logs")]
    pub log_dir: PathBuf,

    #[arg(long, value_delimiter = ',', default_value = "101,102,103,104,105")]
    pub room_ids: Vec<String>,
}

impl Cli {
    pub fn parse_and_build_config() -> Result<Config> {
        let cli = <Cli as Parser>::parse();

        let mut builder = config::Config::builder()
            .set_default("max_service", cli.max_service as i64)?
            .set_default("time_scale", cli.time_scale)?
            .set_default("time_slice_s", cli.time_slice_s)?
            .set_default("recover_rate_per_min", cli.recover_rate_per_min)?
            .set_default("tick_step_ms", cli.tick_step_ms as i64)?
            .set_default("mode", cli.mode.clone())?
            .set_default("log_dir", cli.log_dir.to_string_lossy().to_string())?;

        if let Some(path) = &cli.config_file {
            builder = builder.add_source(config::File::from(path.clone()));
        }

        let settings = builder.build()?;

        let mode_str = settings.get_string("mode")?;
        let mode = Mode::parse(&mode_str)
            .ok_or_else(|| anyhow::anyhow!("invalid mode in config: {mode_str}"))?;

        Ok(Config {
            max_service: settings.get_int("max_service")? as usize,
            time_scale: settings.get_float("time_scale")?,
            time_slice_s: settings.get_float("time_slice_s")?,
            recover_rate_per_min: settings.get_float("recover_rate_per_min")?,
            tick_step: Duration::from_millis(settings.get_int("tick_step_ms")? as u64),
            initial_mode: mode,
            log_dir: PathBuf::from(settings.get_string("log_dir")?),
            room_ids: cli.room_ids,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hysteresis_band_and_epsilon_are_bit_exact() {
        let cfg = Config {
            max_service: 3,
            time_scale: 6.0,
            time_slice_s: 120.0,
            recover_rate_per_min: 0.5,
            tick_step: Duration::from_millis(300),
            initial_mode: Mode::Cool,
            log_dir: PathBuf::from("logs"),
            room_ids: vec!["101".into()],
        };
        assert_eq!(cfg.hysteresis_band(), 1.0);
        assert_eq!(cfg.epsilon(), 0.001);
    }
}
