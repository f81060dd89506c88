//! Cross-tab listener: follows other tabs' writes to one physical key.
//!
//! The first matching event opens a debounce window; later events for the
//! key inside the window are absorbed. When the window closes the record is
//! read back from the store, so a local write made during the window wins
//! over the event payloads.

use std::sync::Arc;

use tabvault_store::{StorageEvent, StorageEvents};

use crate::binding::{Bindable, Shared};

pub(crate) async fn listen<T: Bindable>(shared: Arc<Shared<T>>, mut events: StorageEvents) {
    while next_for_key(&mut events, &shared.pkey).await.is_some() {
        let mut absorbed = 0usize;
        let mut closed = false;

        let deadline = tokio::time::sleep(shared.opts.debounce);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => break,
                next = events.recv() => match next {
                    Some(event) if event.key == shared.pkey => absorbed += 1,
                    Some(_) => {}
                    None => {
                        closed = true;
                        break;
                    }
                },
            }
        }

        tracing::debug!(key = %shared.pkey, absorbed, "refreshing after write from another tab");
        shared.refresh_from_store();
        if closed {
            break;
        }
    }
    tracing::debug!(key = %shared.pkey, "cross-tab listener stopped");
}

async fn next_for_key(events: &mut StorageEvents, pkey: &str) -> Option<StorageEvent> {
    loop {
        let event = events.recv().await?;
        if event.key == pkey {
            return Some(event);
        }
    }
}
