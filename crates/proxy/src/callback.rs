//! Best-effort callback POST: launched on a supervised task, its result
//! ignored. Dropping a callback is acceptable; blocking the handler is not.

use std::time::Duration;
use url::Url;

const CALLBACK_TIMEOUT: Duration = Duration::from_secs(10);

pub fn fire_and_forget(url: Url, body: serde_json::Value, trace_id: String) {
    tokio::spawn(async move {
        let client = match reqwest::Client::builder().timeout(CALLBACK_TIMEOUT).build() {
            Ok(client) => client,
            Err(err) => {
                tracing::warn!(trace_id, error = %err, "failed to build callback client");
                return;
            }
        };

        if let Err(err) = client.post(url.clone()).json(&body).send().await {
            tracing::warn!(trace_id, url = %url, error = %err, "write callback failed");
        }
    });
}
