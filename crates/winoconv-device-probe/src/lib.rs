//! CPU capability probing for the winoconv Winograd engine.
//!
//! The transform registry tags micro-kernels with the instruction-set
//! extensions they need; this crate answers which of those the running CPU
//! has. `WINOCONV_CPU_FAKE` replaces the detected SIMD flags for deterministic
//! tests unless `WINOCONV_STRICT_MODE=1`.

use std::collections::HashSet;
use std::fmt;

// ── CPU capabilities ─────────────────────────────────────────────────────────

/// CPU capabilities detected at runtime.
///
/// Obtained by calling [`probe_cpu`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuCapabilities {
    /// Number of logical CPU cores available to the process (always ≥ 1).
    pub core_count: usize,
    /// Advanced SIMD (`AArch64` only).
    pub has_neon: bool,
    /// Scalable Vector Extension (`AArch64` only).
    pub has_sve: bool,
    /// Half-precision vector arithmetic (`AArch64` only).
    pub has_fp16: bool,
}

impl CpuCapabilities {
    /// A CPU with no SIMD extensions at all.
    pub fn baseline() -> Self {
        Self { core_count: available_cores(), has_neon: false, has_sve: false, has_fp16: false }
    }

    /// The same CPU with every SIMD flag cleared.
    #[must_use]
    pub fn without_simd(&self) -> Self {
        Self { core_count: self.core_count, ..Self::baseline() }
    }
}

impl fmt::Display for CpuCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cores={} neon={} sve={} fp16={}",
            self.core_count, self.has_neon, self.has_sve, self.has_fp16
        )
    }
}

fn available_cores() -> usize {
    std::thread::available_parallelism().map(std::num::NonZero::get).unwrap_or(1)
}

/// Probe the current CPU and return its capabilities.
///
/// `core_count` is derived from [`std::thread::available_parallelism`] and is
/// guaranteed to be ≥ 1. SIMD flags come from `is_aarch64_feature_detected!`
/// on `aarch64` and are all clear elsewhere, unless `WINOCONV_CPU_FAKE`
/// overrides them.
///
/// # Examples
///
/// ```
/// use winoconv_device_probe::probe_cpu;
///
/// let caps = probe_cpu();
/// assert!(caps.core_count >= 1);
/// println!("{caps}");
/// ```
pub fn probe_cpu() -> CpuCapabilities {
    if let Some(fake) = fake_cpu_features() {
        return CpuCapabilities {
            core_count: available_cores(),
            has_neon: fake.contains("neon"),
            has_sve: fake.contains("sve"),
            has_fp16: fake.contains("fp16"),
        };
    }
    detect_cpu()
}

fn detect_cpu() -> CpuCapabilities {
    let core_count = available_cores();

    #[cfg(target_arch = "aarch64")]
    let caps = CpuCapabilities {
        core_count,
        has_neon: std::arch::is_aarch64_feature_detected!("neon"),
        has_sve: std::arch::is_aarch64_feature_detected!("sve"),
        has_fp16: std::arch::is_aarch64_feature_detected!("fp16"),
    };

    #[cfg(not(target_arch = "aarch64"))]
    let caps = CpuCapabilities { core_count, ..CpuCapabilities::baseline() };

    caps
}

fn strict_mode_enabled() -> bool {
    std::env::var("WINOCONV_STRICT_MODE")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Features named by `WINOCONV_CPU_FAKE`, or `None` to probe real hardware.
///
/// `baseline` (or `none`) yields an empty set.
fn fake_cpu_features() -> Option<HashSet<String>> {
    if strict_mode_enabled() {
        return None;
    }
    let fake = std::env::var("WINOCONV_CPU_FAKE").ok()?;
    let normalized = fake.trim().to_ascii_lowercase();
    if normalized.is_empty() {
        return None;
    }
    if normalized == "baseline" || normalized == "none" {
        return Some(HashSet::new());
    }
    Some(
        normalized
            .split([',', ';', '|', ' '])
            .filter(|part| !part.is_empty())
            .map(ToOwned::to_owned)
            .collect(),
    )
}
