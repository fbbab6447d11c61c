//! Reply pool provisioning.

use db::{RecordStore, store};
use rpc_core::{KbPath, ReplySlot, RpcError, RpcResult, SlotId};

/// Allocate `depth` free slots for a client path.
///
/// A pool is provisioned once; its depth never changes afterwards. Fails with
/// `Validation` for a zero depth or a path that already has slots.
pub async fn provision_reply_pool<S: RecordStore<ReplySlot>>(
    store: &S,
    path: &KbPath,
    depth: usize,
) -> RpcResult<Vec<SlotId>> {
    if depth == 0 {
        return Err(RpcError::Validation(format!(
            "reply pool {} needs at least one slot",
            path
        )));
    }

    let all = store::predicate(|_: &ReplySlot| true);
    let existing = store.count_matching(path.as_str(), &all).await?;
    if existing > 0 {
        return Err(RpcError::Validation(format!(
            "reply pool {} is already provisioned with {} slots",
            path, existing
        )));
    }

    let mut ids = Vec::with_capacity(depth);
    for _ in 0..depth {
        let slot = store.insert(ReplySlot::free(path.clone())).await?;
        ids.push(slot.id);
    }

    tracing::info!("Provisioned reply pool {} with {} slots", path, depth);
    Ok(ids)
}
