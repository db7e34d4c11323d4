use bitcoin::Txid;

/// Broadcast to subscribers (the sync driver, for relay to peers) on every
/// pool mutation (spec §4.4 "emits events for new/removed/evicted").
#[derive(Clone, Debug)]
pub enum MempoolEvent {
    Added { txid: Txid },
    Confirmed { txid: Txid },
    Evicted { txid: Txid },
    Orphaned { txid: Txid },
}
