//! Engine log-line classification.
//!
//! Every stdout/stderr line from the subprocess is classified into a debug
//! level and, for known loader markers, a progress milestone. The tables
//! here are the single source of truth — the lifecycle manager contains no
//! string matching of its own.

use mg_events::{ActivationStep, DebugLevel};

/// Substring markers that advance activation progress.
const PROGRESS_MARKERS: [(&str, u8, ActivationStep); 8] = [
    (
        "Automatically detected platform",
        15,
        ActivationStep::PlatformDetection,
    ),
    (
        "Loading safetensors checkpoint shards",
        25,
        ActivationStep::LoadingWeights,
    ),
    ("Loading weights took", 40, ActivationStep::WeightsLoaded),
    ("init engine", 60, ActivationStep::EngineInit),
    (
        "profile, create kv cache, warmup model",
        60,
        ActivationStep::EngineInit,
    ),
    ("Maximum concurrency", 75, ActivationStep::EngineReady),
    ("Starting vLLM API server", 80, ActivationStep::ServerStart),
    ("Available routes are:", 90, ActivationStep::RoutesReady),
];

/// Markers for engine performance numbers worth surfacing at PERF level.
const PERF_MARKERS: [&str; 5] = [
    "Maximum concurrency",
    "# cpu blocks",
    "# GPU blocks",
    "GPU memory utilization",
    "blocks:",
];

/// Classification of a single log line.
#[derive(Debug, Clone, PartialEq)]
pub struct LineClass {
    pub level: DebugLevel,
    /// Progress milestone this line announces, if any.
    pub progress: Option<(u8, ActivationStep)>,
}

/// Classify one line of engine output.
///
/// The engine writes most loader progress to stderr, so stderr lines that
/// hit a progress marker are informational rather than warnings.
pub fn classify_line(line: &str, from_stderr: bool) -> LineClass {
    let progress = PROGRESS_MARKERS
        .iter()
        .find(|(needle, _, _)| line.contains(needle))
        .map(|&(_, pct, step)| (pct, step));

    let level = if line.contains("ERROR") || line.contains("FAILED") || line.contains("FATAL") {
        DebugLevel::Error
    } else if line.contains("WARNING") || line.contains("WARN") {
        DebugLevel::Warning
    } else if PERF_MARKERS.iter().any(|m| line.contains(m)) {
        DebugLevel::Perf
    } else if from_stderr && progress.is_some() {
        DebugLevel::Info
    } else if from_stderr {
        DebugLevel::Warning
    } else {
        DebugLevel::Info
    };

    LineClass { level, progress }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Monotonic progress
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Enforces non-decreasing progress within an activation. A marker that
/// fires below the high-water mark is downgraded to a debug event by the
/// caller.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    last_pct: u8,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the milestone advances (or matches) the
    /// high-water mark and should be published as Progress.
    pub fn accept(&mut self, pct: u8) -> bool {
        if pct >= self.last_pct {
            self.last_pct = pct;
            true
        } else {
            false
        }
    }

    pub fn last_pct(&self) -> u8 {
        self.last_pct
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_markers_win() {
        let c = classify_line("ERROR 04-12 engine core died", true);
        assert_eq!(c.level, DebugLevel::Error);
        let c = classify_line("model load FAILED: missing shard", false);
        assert_eq!(c.level, DebugLevel::Error);
        let c = classify_line("FATAL: CUDA out of memory", false);
        assert_eq!(c.level, DebugLevel::Error);
    }

    #[test]
    fn warning_markers() {
        let c = classify_line("WARNING 04-12 flash-attn not found", false);
        assert_eq!(c.level, DebugLevel::Warning);
        let c = classify_line("WARN: tokenizer mismatch", false);
        assert_eq!(c.level, DebugLevel::Warning);
    }

    #[test]
    fn perf_markers() {
        for line in [
            "INFO 04-12 Maximum concurrency for 16384 tokens per request: 8.2x",
            "# GPU blocks: 4096",
            "# cpu blocks: 512",
            "INFO GPU memory utilization reached 0.85",
            "cache blocks: 2048",
        ] {
            assert_eq!(classify_line(line, false).level, DebugLevel::Perf, "{line}");
        }
    }

    #[test]
    fn stderr_progress_lines_are_info() {
        let c = classify_line(
            "Loading safetensors checkpoint shards:  25% Completed",
            true,
        );
        assert_eq!(c.level, DebugLevel::Info);
        assert_eq!(c.progress, Some((25, ActivationStep::LoadingWeights)));
    }

    #[test]
    fn plain_stderr_is_warning_plain_stdout_is_info() {
        assert_eq!(
            classify_line("some unexpected chatter", true).level,
            DebugLevel::Warning
        );
        assert_eq!(
            classify_line("some unexpected chatter", false).level,
            DebugLevel::Info
        );
    }

    #[test]
    fn progress_marker_table() {
        let cases: [(&str, u8, ActivationStep); 8] = [
            (
                "INFO 04-12 Automatically detected platform cuda.",
                15,
                ActivationStep::PlatformDetection,
            ),
            (
                "Loading safetensors checkpoint shards:   0% Completed",
                25,
                ActivationStep::LoadingWeights,
            ),
            (
                "INFO Loading weights took 12.34 seconds",
                40,
                ActivationStep::WeightsLoaded,
            ),
            ("INFO 04-12 init engine (profile, create kv cache, warmup model) took 31.2s",
                60,
                ActivationStep::EngineInit,
            ),
            (
                "INFO Maximum concurrency for 16384 tokens per request: 8.2x",
                75,
                ActivationStep::EngineReady,
            ),
            (
                "INFO 04-12 Starting vLLM API server on http://0.0.0.0:8003",
                80,
                ActivationStep::ServerStart,
            ),
            (
                "INFO 04-12 Available routes are:",
                90,
                ActivationStep::RoutesReady,
            ),
            (
                "(profile, create kv cache, warmup model)",
                60,
                ActivationStep::EngineInit,
            ),
        ];
        for (line, pct, step) in cases {
            let c = classify_line(line, false);
            assert_eq!(c.progress, Some((pct, step)), "{line}");
        }
    }

    #[test]
    fn unknown_line_has_no_progress() {
        assert_eq!(classify_line("INFO tokenizer loaded", false).progress, None);
    }

    #[test]
    fn tracker_is_monotonic() {
        let mut t = ProgressTracker::new();
        assert!(t.accept(15));
        assert!(t.accept(40));
        // A late marker below the high-water mark is refused.
        assert!(!t.accept(25));
        assert_eq!(t.last_pct(), 40);
        // Equal progress is allowed (repeated marker).
        assert!(t.accept(40));
        assert!(t.accept(90));
    }
}
