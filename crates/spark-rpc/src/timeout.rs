use std::time::Duration;

use spark_rpc_transport::TimeoutConfig;

use crate::diagnostics::{Diagnostic, DiagnosticReporter};

/// 合并统一 `timeout` 与显式的 `socket` / `connect` 超时。
///
/// # 契约（What）
/// - `legacy` 存在且非零时同时覆盖两个超时，并上报 [`Diagnostic::DeprecatedTimeout`]；
/// - 否则使用显式的一对值，零值表示不设上界。
pub fn resolve_timeouts(
    legacy: Option<Duration>,
    socket: Option<Duration>,
    connect: Option<Duration>,
    reporter: &dyn DiagnosticReporter,
) -> TimeoutConfig {
    match legacy.filter(|timeout| !timeout.is_zero()) {
        Some(timeout) => {
            reporter.report(&Diagnostic::DeprecatedTimeout);
            TimeoutConfig::uniform(timeout)
        }
        None => TimeoutConfig::new(connect, socket),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CollectingReporter;

    const FIVE_SECONDS: Duration = Duration::from_millis(5000);

    #[test]
    fn legacy_timeout_matches_explicit_pair() {
        let reporter = CollectingReporter::new();
        let legacy = resolve_timeouts(Some(FIVE_SECONDS), None, None, &reporter);
        let explicit = resolve_timeouts(None, Some(FIVE_SECONDS), Some(FIVE_SECONDS), &reporter);
        assert_eq!(legacy, explicit);
        assert_eq!(legacy.connect, Some(FIVE_SECONDS));
        assert_eq!(legacy.socket, Some(FIVE_SECONDS));
        assert_eq!(reporter.take(), vec![Diagnostic::DeprecatedTimeout]);
    }

    #[test]
    fn legacy_timeout_wins_over_explicit_values() {
        let reporter = CollectingReporter::new();
        let resolved = resolve_timeouts(
            Some(FIVE_SECONDS),
            Some(Duration::from_millis(10)),
            Some(Duration::from_millis(20)),
            &reporter,
        );
        assert_eq!(resolved, TimeoutConfig::uniform(FIVE_SECONDS));
    }

    #[test]
    fn explicit_pair_is_silent() {
        let reporter = CollectingReporter::new();
        let resolved = resolve_timeouts(
            None,
            Some(Duration::from_millis(250)),
            Some(Duration::ZERO),
            &reporter,
        );
        assert_eq!(resolved.connect, None);
        assert_eq!(resolved.socket, Some(Duration::from_millis(250)));
        assert!(reporter.diagnostics().is_empty());
    }
}
