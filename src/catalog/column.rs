use anyhow::{Result, anyhow, bail};
use serde::Deserialize;

/// How a projected query column is interpreted when rows are turned into
/// metric samples. Only `GAUGE` and `COUNTER` columns produce samples;
/// `LABEL` columns become labels and everything else is carried through the
/// catalog without emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnUsage {
    Discard,
    Label,
    Gauge,
    Counter,
    Histogram,
    Duration,
    Bytes,
}

impl ColumnUsage {
    /// Parse a usage keyword, case-insensitively.
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "DISCARD" => Ok(Self::Discard),
            "LABEL" => Ok(Self::Label),
            "GAUGE" => Ok(Self::Gauge),
            "COUNTER" => Ok(Self::Counter),
            "HISTOGRAM" => Ok(Self::Histogram),
            "DURATION" => Ok(Self::Duration),
            "BYTES" => Ok(Self::Bytes),
            "" => Err(anyhow!("empty usage")),
            other => Err(anyhow!("unsupported usage: {other}")),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Discard => "DISCARD",
            Self::Label => "LABEL",
            Self::Gauge => "GAUGE",
            Self::Counter => "COUNTER",
            Self::Histogram => "HISTOGRAM",
            Self::Duration => "DURATION",
            Self::Bytes => "BYTES",
        }
    }

    #[must_use]
    pub const fn is_label(self) -> bool {
        matches!(self, Self::Label)
    }

    /// Whether this usage emits a metric sample.
    #[must_use]
    pub const fn is_metric(self) -> bool {
        matches!(self, Self::Gauge | Self::Counter)
    }
}

/// One projected column of a catalog query.
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    /// Overrides the label name / metric suffix when set.
    pub rename: Option<String>,
    pub usage: ColumnUsage,
    pub desc: String,
    /// Multiplier applied to numeric values.
    pub scale: Option<f64>,
    /// Substitute for NULL values, scaled like any other number.
    pub default: Option<f64>,
}

impl Column {
    /// The label name (or metric suffix) this column contributes, honoring
    /// `rename`.
    #[must_use]
    pub fn label_name(&self) -> &str {
        self.rename.as_deref().unwrap_or(&self.name)
    }
}

/// Raw YAML shape of a column definition. Numeric options accept either a
/// YAML number or a string, converted by [`RawColumn::into_column`] so that
/// bad numerics are rejected at load time rather than at scrape time.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct RawColumn {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub rename: Option<String>,
    #[serde(default)]
    pub usage: Option<String>,
    #[serde(default, alias = "description")]
    pub desc: Option<String>,
    #[serde(default)]
    pub scale: Option<NumberOrText>,
    #[serde(default)]
    pub default: Option<NumberOrText>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum NumberOrText {
    Number(f64),
    Text(String),
}

impl NumberOrText {
    fn to_f64(&self, what: &str) -> Result<f64> {
        match self {
            Self::Number(n) => Ok(*n),
            Self::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| anyhow!("invalid {what}: {s:?}")),
        }
    }
}

impl RawColumn {
    /// Convert the raw YAML column into its validated form. `col_name` is the
    /// metrics-entry key, used when `name` is not given explicitly.
    pub(crate) fn into_column(self, col_name: &str) -> Result<Column> {
        let usage = match self.usage.as_deref() {
            Some(u) => ColumnUsage::parse(u)?,
            None => bail!("empty usage"),
        };
        let scale = self.scale.map(|v| v.to_f64("scale")).transpose()?;
        let default = self.default.map(|v| v.to_f64("default")).transpose()?;
        Ok(Column {
            name: self.name.unwrap_or_else(|| col_name.to_string()),
            rename: self.rename.filter(|r| !r.is_empty()),
            usage,
            desc: self.desc.unwrap_or_default(),
            scale,
            default,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_case_insensitive() {
        for variant in ["gauge", "GAUGE", "Gauge", " gauge "] {
            assert_eq!(ColumnUsage::parse(variant).unwrap(), ColumnUsage::Gauge);
        }
        assert_eq!(ColumnUsage::parse("label").unwrap(), ColumnUsage::Label);
        assert_eq!(ColumnUsage::parse("counter").unwrap(), ColumnUsage::Counter);
    }

    #[test]
    fn test_usage_rejects_unknown() {
        assert!(ColumnUsage::parse("bad_usage").is_err());
        assert!(ColumnUsage::parse("").is_err());
    }

    #[test]
    fn test_usage_classification() {
        assert!(ColumnUsage::Label.is_label());
        assert!(ColumnUsage::Gauge.is_metric());
        assert!(ColumnUsage::Counter.is_metric());
        assert!(!ColumnUsage::Discard.is_metric());
        assert!(!ColumnUsage::Histogram.is_metric());
    }

    #[test]
    fn test_label_name_honors_rename() {
        let col = Column {
            name: "datname".into(),
            rename: Some("db".into()),
            usage: ColumnUsage::Label,
            desc: String::new(),
            scale: None,
            default: None,
        };
        assert_eq!(col.label_name(), "db");
    }

    #[test]
    fn test_raw_column_parses_numbers_once() {
        let raw = RawColumn {
            usage: Some("gauge".into()),
            scale: Some(NumberOrText::Text("2".into())),
            default: Some(NumberOrText::Number(2.5)),
            ..RawColumn::default()
        };
        let col = raw.into_column("value").unwrap();
        assert_eq!(col.scale, Some(2.0));
        assert_eq!(col.default, Some(2.5));
        assert_eq!(col.name, "value");
    }

    #[test]
    fn test_raw_column_rejects_bad_numbers() {
        let raw = RawColumn {
            usage: Some("gauge".into()),
            scale: Some(NumberOrText::Text("bad".into())),
            ..RawColumn::default()
        };
        assert!(raw.into_column("value").is_err());

        let raw = RawColumn {
            usage: Some("gauge".into()),
            default: Some(NumberOrText::Text("bad".into())),
            ..RawColumn::default()
        };
        assert!(raw.into_column("value").is_err());
    }
}
