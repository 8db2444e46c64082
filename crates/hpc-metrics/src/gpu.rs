//! GPU discovery behind a trait, so a real `nvidia-smi` shell-out can be
//! swapped in without touching the collector.

use async_trait::async_trait;

/// One GPU device's current readings.
#[derive(Debug, Clone, Default)]
pub struct GpuReading {
    pub model: String,
    pub utilization_percent: f64,
    pub memory_utilization_percent: f64,
    pub temperature_celsius: Option<f64>,
}

#[async_trait]
pub trait GpuProbe: Send + Sync {
    /// Return one reading per discovered GPU. An empty vec means no GPUs
    /// present, not a failure.
    async fn probe(&self) -> Vec<GpuReading>;
}

/// Default probe for nodes with no GPU discovery backend wired in.
pub struct NullGpuProbe;

#[async_trait]
impl GpuProbe for NullGpuProbe {
    async fn probe(&self) -> Vec<GpuReading> {
        Vec::new()
    }
}

/// Shells out to `nvidia-smi --query-gpu=... --format=csv,noheader,nounits`
/// and parses the comma-separated output. Missing binary or parse failure
/// degrades to an empty reading set rather than failing the snapshot.
pub struct NvidiaSmiProbe {
    pub binary_path: String,
}

impl Default for NvidiaSmiProbe {
    fn default() -> Self {
        Self {
            binary_path: "nvidia-smi".into(),
        }
    }
}

#[async_trait]
impl GpuProbe for NvidiaSmiProbe {
    async fn probe(&self) -> Vec<GpuReading> {
        let output = tokio::process::Command::new(&self.binary_path)
            .args([
                "--query-gpu=name,utilization.gpu,utilization.memory,temperature.gpu",
                "--format=csv,noheader,nounits",
            ])
            .output()
            .await;

        let Ok(output) = output else {
            tracing::warn!(binary = %self.binary_path, "nvidia-smi unavailable, reporting no GPUs");
            return Vec::new();
        };
        if !output.status.success() {
            return Vec::new();
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout.lines().filter_map(parse_csv_line).collect()
    }
}

fn parse_csv_line(line: &str) -> Option<GpuReading> {
    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    if parts.len() != 4 {
        return None;
    }
    Some(GpuReading {
        model: parts[0].to_string(),
        utilization_percent: parts[1].parse().ok()?,
        memory_utilization_percent: parts[2].parse().ok()?,
        temperature_celsius: parts[3].parse().ok(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_csv_line() {
        let reading = parse_csv_line("A100, 42, 13, 65").unwrap();
        assert_eq!(reading.model, "A100");
        assert_eq!(reading.utilization_percent, 42.0);
        assert_eq!(reading.temperature_celsius, Some(65.0));
    }

    #[test]
    fn rejects_malformed_line() {
        assert!(parse_csv_line("garbage").is_none());
    }

    #[tokio::test]
    async fn null_probe_reports_no_gpus() {
        assert!(NullGpuProbe.probe().await.is_empty());
    }
}
