use crate::config::{RuntimeConfigOverrides, StaticEventFanOut};
use anyhow::{anyhow, bail, Context, Result};
use std::env;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CliOverrides {
    fan_out: Option<StaticEventFanOut>,
    zero_tolerance: Option<f32>,
}

impl CliOverrides {
    pub fn parse_from_env() -> Result<Self> {
        Self::parse(env::args())
    }

    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut overrides = CliOverrides::default();
        let mut iter = args.into_iter();
        let _ = iter.next(); // skip program name if present
        while let Some(raw_flag) = iter.next() {
            let flag = raw_flag.as_ref();
            if !flag.starts_with("--") {
                bail!("Unexpected argument '{flag}'. Use --fan-out/--zero-tolerance with values.");
            }
            let key = &flag[2..];
            let value =
                iter.next().ok_or_else(|| anyhow!("Expected a value after '{flag}'"))?.as_ref().to_string();
            match key {
                "fan-out" => {
                    overrides.fan_out = Some(StaticEventFanOut::parse(&value).ok_or_else(|| {
                        anyhow!("Invalid fan-out '{value}'. Use first_script or all_scripts.")
                    })?);
                }
                "zero-tolerance" => {
                    let tolerance =
                        value.parse::<f32>().with_context(|| format!("Invalid zero-tolerance '{value}'"))?;
                    if !tolerance.is_finite() || tolerance < 0.0 {
                        bail!("Invalid zero-tolerance '{value}'. Expected a non-negative number.");
                    }
                    overrides.zero_tolerance = Some(tolerance);
                }
                _ => bail!("Unknown flag '{flag}'. Supported flags: --fan-out, --zero-tolerance."),
            }
        }
        Ok(overrides)
    }

    pub fn into_config_overrides(self) -> RuntimeConfigOverrides {
        RuntimeConfigOverrides { static_event_fan_out: self.fan_out, zero_tolerance: self.zero_tolerance }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fan_out_and_tolerance() {
        let args = ["harness", "--fan-out", "all", "--zero-tolerance", "0.001"];
        let overrides = CliOverrides::parse(args).expect("parse overrides").into_config_overrides();
        assert_eq!(overrides.static_event_fan_out, Some(StaticEventFanOut::AllScripts));
        assert_eq!(overrides.zero_tolerance, Some(0.001));
    }

    #[test]
    fn latest_flag_wins() {
        let args = ["harness", "--fan-out", "all_scripts", "--fan-out", "first-script"];
        let overrides = CliOverrides::parse(args).expect("parse overrides");
        assert_eq!(overrides.fan_out, Some(StaticEventFanOut::FirstScript));
    }

    #[test]
    fn missing_value_errors() {
        let err = CliOverrides::parse(["harness", "--fan-out"]).unwrap_err();
        assert!(err.to_string().contains("Expected a value"), "error should mention missing value");
    }

    #[test]
    fn rejects_unknown_flags_and_negative_tolerance() {
        let err = CliOverrides::parse(["harness", "--foo", "bar"]).unwrap_err();
        assert!(err.to_string().contains("Unknown flag"), "unknown flags should error");
        assert!(CliOverrides::parse(["harness", "--zero-tolerance", "-1"]).is_err());
    }
}
