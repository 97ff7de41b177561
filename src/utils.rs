use crate::core::command::{FilePostProcessor, FilePreProcessor, InputFile, OutputFile};
use anyhow::{anyhow, bail, Context, Result};
use clap::builder::{
    styling::{AnsiColor, Effects},
    Styles,
};
use std::str::FromStr;
use std::time::Duration;

/// Parse a `--timeout` value: `MM`, `MM:SS` or `HH:MM:SS`.
///
/// ```
/// use std::time::Duration;
/// use gexec::utils::parse_timeout;
///
/// assert_eq!(parse_timeout("2:30:45").unwrap(), Duration::from_secs(9045));
/// ```
pub fn parse_timeout(value: &str) -> Result<Duration> {
    let fields: Vec<&str> = value.split(':').collect();
    // a lone field counts minutes
    let units: &[u64] = match fields.len() {
        1 => &[60],
        2 => &[60, 1],
        3 => &[3600, 60, 1],
        _ => bail!("Invalid timeout '{value}'. Expected MM, MM:SS or HH:MM:SS"),
    };

    let mut seconds = 0;
    for (field, unit) in fields.iter().zip(units) {
        let amount: u64 = field
            .parse()
            .with_context(|| format!("Invalid timeout '{value}': '{field}' is not a number"))?;
        seconds += amount * unit;
    }
    if seconds == 0 {
        bail!("Timeout must be greater than zero");
    }
    Ok(Duration::from_secs(seconds))
}

/// Elapsed wall time as `HH:MM:SS`; hours are not wrapped.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60)
}

/// Parse a `NAME=VALUE` environment assignment.
pub fn parse_env_var(s: &str) -> Result<(String, String)> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| anyhow!("Invalid variable '{s}'. Expected NAME=VALUE"))?;
    let valid_name = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid_name {
        return Err(anyhow!("Invalid variable name '{name}'"));
    }
    Ok((name.to_string(), value.to_string()))
}

/// Parse `NAME[:PROCESSOR]`. A suffix that is not a known processor stays
/// part of the name.
fn split_processor<P: FromStr>(spec: &str) -> (&str, Option<P>) {
    match spec.rsplit_once(':') {
        Some((name, processor)) if !name.is_empty() => match processor.parse::<P>() {
            Ok(processor) => (name, Some(processor)),
            Err(_) => (spec, None),
        },
        _ => (spec, None),
    }
}

/// Parse an input file spec such as `data.gz:gunzip` or `bundle.zip:unzip`.
pub fn parse_input_file(spec: &str) -> Result<InputFile> {
    if spec.is_empty() {
        return Err(anyhow!("Input file name is empty"));
    }
    Ok(match split_processor::<FilePreProcessor>(spec) {
        (name, Some(processor)) => InputFile::with_pre_processor(name, processor),
        (name, None) => InputFile::new(name),
    })
}

/// Parse an output file spec such as `result.txt:gzip`.
pub fn parse_output_file(spec: &str) -> Result<OutputFile> {
    if spec.is_empty() {
        return Err(anyhow!("Output file name is empty"));
    }
    Ok(match split_processor::<FilePostProcessor>(spec) {
        (name, Some(processor)) => OutputFile::with_post_processor(name, processor),
        (name, None) => OutputFile::new(name),
    })
}

pub const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default());

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timeout_formats() {
        assert_eq!(parse_timeout("1").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_timeout("0:30").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_timeout("1:00:00").unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn test_parse_timeout_invalid() {
        assert!(parse_timeout("").is_err());
        assert!(parse_timeout("abc").is_err());
        assert!(parse_timeout("1:2:3:4").is_err());
        assert!(parse_timeout("0").is_err());
        assert!(parse_timeout("00:00").is_err());
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_millis(45_900)), "00:00:45");
        assert_eq!(format_elapsed(Duration::from_secs(3_725)), "01:02:05");
        assert_eq!(format_elapsed(Duration::from_secs(90_000)), "25:00:00");
    }

    #[test]
    fn test_parse_env_var() {
        assert_eq!(
            parse_env_var("MODE=fast").unwrap(),
            ("MODE".to_string(), "fast".to_string())
        );
        // only the first '=' splits
        assert_eq!(
            parse_env_var("OPTS=a=b").unwrap(),
            ("OPTS".to_string(), "a=b".to_string())
        );
        assert_eq!(parse_env_var("EMPTY=").unwrap().1, "");
    }

    #[test]
    fn test_parse_env_var_invalid() {
        assert!(parse_env_var("NOVALUE").is_err());
        assert!(parse_env_var("=x").is_err());
        assert!(parse_env_var("1ABC=x").is_err());
        assert!(parse_env_var("A-B=x").is_err());
    }

    #[test]
    fn test_parse_input_file() {
        let plain = parse_input_file("case.xml").unwrap();
        assert_eq!(plain.name(), "case.xml");
        assert_eq!(plain.pre_processor(), None);

        let gz = parse_input_file("data_{index}.gz:gunzip").unwrap();
        assert_eq!(gz.name(), "data_{index}.gz");
        assert_eq!(gz.pre_processor(), Some(FilePreProcessor::Gunzip));

        let zip = parse_input_file("bundle.zip:unzip").unwrap();
        assert_eq!(zip.pre_processor(), Some(FilePreProcessor::ArchiveUnzip));

        // unknown suffix is part of the name
        let odd = parse_input_file("c:weird").unwrap();
        assert_eq!(odd.name(), "c:weird");
        assert_eq!(odd.pre_processor(), None);

        assert!(parse_input_file("").is_err());
    }

    #[test]
    fn test_parse_output_file() {
        let gz = parse_output_file("result.txt:gzip").unwrap();
        assert_eq!(gz.name(), "result.txt");
        assert_eq!(gz.post_processor(), Some(FilePostProcessor::Gzip));
        assert_eq!(parse_output_file("log.txt").unwrap().post_processor(), None);
    }
}
