//! Notification collaborator — spec §1/§7. Telegram/HTTP transports are
//! out of scope; this module defines the `Notifier` contract every
//! pause transition and rejected order must go through, plus a
//! `LogNotifier` default that routes through the teacher's `log` facade.

use crate::risk::PauseState;

pub trait Notifier: Send + Sync {
    fn pause_transition(&self, from: PauseState, to: PauseState);
    fn order_rejected(&self, cl_ord_id: &str, reason: &str);
    /// Loud and persistent until `acknowledge` is called — spec §7
    /// "Ledger mismatches are loud: persistent alert until operator
    /// acknowledgement."
    fn ledger_mismatch_alert(&self, detail: &str);
    fn book_checksum_mismatch(&self, detail: &str);
}

pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn pause_transition(&self, from: PauseState, to: PauseState) {
        log::info!("pause state: {:?} -> {:?}", from, to);
    }

    fn order_rejected(&self, cl_ord_id: &str, reason: &str) {
        log::debug!("order rejected cl_ord_id={cl_ord_id} reason={reason}");
    }

    fn ledger_mismatch_alert(&self, detail: &str) {
        log::error!("LEDGER MISMATCH (requires operator acknowledgement): {detail}");
    }

    fn book_checksum_mismatch(&self, detail: &str) {
        log::warn!("book checksum mismatch, resubscribing: {detail}");
    }
}
