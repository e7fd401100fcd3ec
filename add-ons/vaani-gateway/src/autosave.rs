//! Draft autosave: persist the form once it has stopped changing for a moment.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use vaani_core::{FormData, FormStore};
use vaani_voice::SessionHandle;

/// Watch the session's form and save it after `debounce` of quiet.
pub fn spawn_autosave(
    session: SessionHandle,
    store: Arc<dyn FormStore>,
    debounce: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut views = session.subscribe();
        let mut last_saved: FormData = views.borrow().form.clone();

        loop {
            if views.changed().await.is_err() {
                return;
            }
            let dirty = views.borrow().form != last_saved;
            if !dirty {
                continue;
            }
            // restart the window on every further change
            loop {
                match tokio::time::timeout(debounce, views.changed()).await {
                    Ok(Ok(())) => continue,
                    Ok(Err(_)) => return,
                    Err(_) => break,
                }
            }
            let form = views.borrow().form.clone();
            if form == last_saved {
                continue;
            }
            match store.save_draft(&form).await {
                Ok(()) => {
                    debug!(target: "vaani::autosave", "draft saved");
                    last_saved = form;
                }
                Err(e) => warn!(target: "vaani::autosave", "Draft save failed: {}", e),
            }
        }
    })
}
