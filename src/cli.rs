use crate::config::RuntimeConfigOverrides;
use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CliOptions {
    script: Option<PathBuf>,
    config: Option<PathBuf>,
    timeout: Option<f64>,
    grace: Option<u64>,
}

impl CliOptions {
    pub fn parse_from_env() -> Result<Self> {
        Self::parse(env::args())
    }

    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut options = CliOptions::default();
        let mut iter = args.into_iter();
        let _ = iter.next(); // skip program name if present
        while let Some(raw) = iter.next() {
            let arg = raw.as_ref();
            if !arg.starts_with("--") {
                if options.script.is_some() {
                    bail!("Unexpected argument '{arg}'. Only one script path may be given.");
                }
                options.script = Some(PathBuf::from(arg));
                continue;
            }
            let key = &arg[2..];
            let value =
                iter.next().ok_or_else(|| anyhow!("Expected a value after '{arg}'"))?.as_ref().to_string();
            match key {
                "config" => {
                    options.config = Some(PathBuf::from(value));
                }
                "timeout" => {
                    options.timeout =
                        Some(value.parse::<f64>().with_context(|| format!("Invalid timeout '{value}'"))?);
                }
                "grace" => {
                    options.grace =
                        Some(value.parse::<u64>().with_context(|| format!("Invalid grace '{value}'"))?);
                }
                _ => bail!("Unknown flag '{arg}'. Supported flags: --config, --timeout, --grace."),
            }
        }
        Ok(options)
    }

    pub fn script(&self) -> Option<&Path> {
        self.script.as_deref()
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config.as_deref()
    }

    pub fn config_overrides(&self) -> RuntimeConfigOverrides {
        RuntimeConfigOverrides { timeout_secs: self.timeout, grace_window_ms: self.grace }
    }

    #[cfg(test)]
    pub fn as_tuple(&self) -> (Option<&str>, Option<&str>, Option<f64>, Option<u64>) {
        (
            self.script.as_deref().and_then(Path::to_str),
            self.config.as_deref().and_then(Path::to_str),
            self.timeout,
            self.grace,
        )
    }
}
