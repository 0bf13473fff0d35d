//! CUDA GPU availability check built on `nvidia-smi`

use crate::ToolError;
use serde::Serialize;
use std::process::Command;

pub const NVIDIA_SMI: &str = "nvidia-smi";

const QUERY_FIELDS: &str = "--query-gpu=index,name,compute_cap,driver_version,memory.total";

const NO_GPU_HINT: &str = "If a GPU should be visible, install the NVIDIA driver and make sure \
     nvidia-smi is on PATH for this user";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Runs external programs; `Err` means the program could not be started
#[cfg_attr(test, mockall::automock)]
pub trait CommandRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, ToolError>;
}

pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, ToolError> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| ToolError::CommandFailed(format!("{program}: {e}")))?;
        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GpuDevice {
    pub index: u32,
    pub name: String,
    /// Compute capability such as `8.6`
    pub capability: String,
    pub memory_mib: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GpuReport {
    pub cuda_available: bool,
    pub driver_version: Option<String>,
    pub cuda_version: Option<String>,
    pub device_count: usize,
    pub devices: Vec<GpuDevice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl GpuReport {
    fn unavailable(reason: String) -> Self {
        Self {
            cuda_available: false,
            driver_version: None,
            cuda_version: None,
            device_count: 0,
            devices: Vec::new(),
            hint: Some(format!("{reason}. {NO_GPU_HINT}")),
        }
    }

    /// One `key: value` line per field
    pub fn lines(&self) -> Vec<String> {
        let or_unknown = |v: &Option<String>| v.clone().unwrap_or_else(|| "unknown".to_string());
        let mut lines = vec![format!("cuda_available: {}", self.cuda_available)];
        if self.cuda_available {
            lines.push(format!("driver_version: {}", or_unknown(&self.driver_version)));
            lines.push(format!("cuda_runtime: {}", or_unknown(&self.cuda_version)));
            lines.push(format!("device_count: {}", self.device_count));
            for device in &self.devices {
                let i = device.index;
                lines.push(format!("device_{i}: {}", device.name));
                lines.push(format!("capability_{i}: {}", device.capability));
                if let Some(mib) = device.memory_mib {
                    lines.push(format!("memory_{i}: {mib} MiB"));
                }
            }
        }
        if let Some(hint) = &self.hint {
            lines.push(format!("hint: {hint}"));
        }
        lines
    }
}

/// Parse the CSV rows of the device query
pub fn parse_device_rows(stdout: &str) -> Vec<(GpuDevice, String)> {
    stdout
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            match fields.as_slice() {
                [index, name, capability, driver, memory, ..] => Some((
                    GpuDevice {
                        index: index.parse().ok()?,
                        name: name.to_string(),
                        capability: capability.to_string(),
                        memory_mib: memory.parse().ok(),
                    },
                    driver.to_string(),
                )),
                _ => None,
            }
        })
        .collect()
}

/// `X.Y` from the `CUDA Version: X.Y` banner field
pub fn parse_cuda_version(banner: &str) -> Option<String> {
    let rest = banner.split("CUDA Version:").nth(1)?;
    let version: String = rest
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    if version.is_empty() {
        None
    } else {
        Some(version)
    }
}

pub fn check_gpu(runner: &dyn CommandRunner) -> GpuReport {
    let query = vec![QUERY_FIELDS.to_string(), "--format=csv,noheader,nounits".to_string()];
    let output = match runner.run(NVIDIA_SMI, &query) {
        Ok(output) => output,
        Err(e) => return GpuReport::unavailable(e.to_string()),
    };
    if !output.success {
        let reason = output.stderr.trim();
        return GpuReport::unavailable(format!("{NVIDIA_SMI} failed: {reason}"));
    }

    let rows = parse_device_rows(&output.stdout);
    if rows.is_empty() {
        return GpuReport::unavailable("no CUDA devices reported".to_string());
    }

    let cuda_version = runner
        .run(NVIDIA_SMI, &[])
        .ok()
        .filter(|banner| banner.success)
        .and_then(|banner| parse_cuda_version(&banner.stdout));
    let driver_version = rows.first().map(|(_, driver)| driver.clone());
    let devices: Vec<GpuDevice> = rows.into_iter().map(|(device, _)| device).collect();

    GpuReport {
        cuda_available: true,
        driver_version,
        cuda_version,
        device_count: devices.len(),
        devices,
        hint: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::*;

    const ROWS: &str = "0, NVIDIA GeForce RTX 3080, 8.6, 546.33, 10240\n\
                        1, NVIDIA A100-SXM4-40GB, 8.0, 546.33, 40960\n";

    const BANNER: &str = "| NVIDIA-SMI 546.33       Driver Version: 546.33       CUDA Version: 12.3     |";

    fn ok(stdout: &str) -> Result<CommandOutput, ToolError> {
        Ok(CommandOutput {
            success: true,
            stdout: stdout.to_string(),
            stderr: String::new(),
        })
    }

    #[test]
    fn test_parse_device_rows() {
        let rows = parse_device_rows(ROWS);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0.name, "NVIDIA GeForce RTX 3080");
        assert_eq!(rows[0].0.capability, "8.6");
        assert_eq!(rows[1].0.memory_mib, Some(40960));
        assert_eq!(rows[0].1, "546.33");
        assert!(parse_device_rows("garbage\n").is_empty());
    }

    #[test]
    fn test_parse_cuda_version() {
        assert_eq!(parse_cuda_version(BANNER), Some("12.3".to_string()));
        assert_eq!(parse_cuda_version("no version here"), None);
    }

    #[test]
    fn test_check_gpu_available() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .with(eq(NVIDIA_SMI), function(|args: &[String]| !args.is_empty()))
            .times(1)
            .returning(|_, _| ok(ROWS));
        runner
            .expect_run()
            .with(eq(NVIDIA_SMI), function(|args: &[String]| args.is_empty()))
            .times(1)
            .returning(|_, _| ok(BANNER));

        let report = check_gpu(&runner);
        assert!(report.cuda_available);
        assert_eq!(report.device_count, 2);
        assert_eq!(report.driver_version.as_deref(), Some("546.33"));
        assert_eq!(report.cuda_version.as_deref(), Some("12.3"));
        assert!(report.lines().contains(&"device_1: NVIDIA A100-SXM4-40GB".to_string()));
    }

    #[test]
    fn test_missing_binary() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .times(1)
            .returning(|_, _| Err(ToolError::CommandFailed("nvidia-smi: not found".to_string())));

        let report = check_gpu(&runner);
        assert!(!report.cuda_available);
        assert_eq!(report.device_count, 0);
        assert!(report.hint.as_deref().unwrap_or_default().contains("not found"));
        assert_eq!(report.lines()[0], "cuda_available: false");
    }

    #[test]
    fn test_nonzero_exit() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().times(1).returning(|_, _| {
            Ok(CommandOutput {
                success: false,
                stdout: String::new(),
                stderr: "NVIDIA-SMI has failed".to_string(),
            })
        });

        let report = check_gpu(&runner);
        assert!(!report.cuda_available);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["cuda_available"], false);
        assert!(json["hint"].as_str().unwrap().contains("NVIDIA-SMI has failed"));
    }
}
