//! User-facing notices raised by the queue.

use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// A write was stored locally and will be sent when the backend is reachable.
    QueuedOffline { item_id: i64, endpoint: String },
    StorageQuotaExceeded { endpoint: String },
    PersistenceFailed { endpoint: String, message: String },
    SyncFinished { success: u32, failed: u32, skipped: u32 },
}

impl Notice {
    /// Text shown to the fiscal agent.
    pub fn message(&self) -> String {
        match self {
            Notice::QueuedOffline { .. } => {
                "Sem conexão. O auto foi salvo e será sincronizado automaticamente.".to_string()
            }
            Notice::StorageQuotaExceeded { .. } => {
                "Espaço de armazenamento local esgotado. Sincronize ou libere espaço antes de continuar."
                    .to_string()
            }
            Notice::PersistenceFailed { .. } => {
                "Não foi possível salvar o auto para sincronização posterior.".to_string()
            }
            Notice::SyncFinished { success, failed, .. } => {
                if *failed == 0 {
                    format!("{} auto(s) sincronizado(s) com sucesso.", success)
                } else {
                    format!("{} auto(s) sincronizado(s), {} com falha.", success, failed)
                }
            }
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Notice::StorageQuotaExceeded { .. } | Notice::PersistenceFailed { .. }
        )
    }
}

/// Sink for user-facing notices.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Default notifier: writes notices to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notice: Notice) {
        if notice.is_error() {
            warn!(notice = ?notice, "{}", notice.message());
        } else {
            info!(notice = ?notice, "{}", notice.message());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_finished_message() {
        let ok = Notice::SyncFinished { success: 3, failed: 0, skipped: 0 };
        assert_eq!(ok.message(), "3 auto(s) sincronizado(s) com sucesso.");

        let partial = Notice::SyncFinished { success: 1, failed: 2, skipped: 0 };
        assert!(partial.message().contains("2 com falha"));
    }

    #[test]
    fn test_error_notices() {
        assert!(Notice::StorageQuotaExceeded { endpoint: "autobanco".into() }.is_error());
        assert!(!Notice::QueuedOffline { item_id: 1, endpoint: "autobanco".into() }.is_error());
    }
}
