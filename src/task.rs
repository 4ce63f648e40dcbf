/*
 * Copyright 2020-2026 Ben Ashford
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

pub(crate) fn spawn<F>(f: F)
where
    F: Future + Send + 'static,
    F::Output: Send,
{
    tokio::spawn(f);
}

pub(crate) fn timeout<T>(duration: Duration, future: T) -> impl Future<Output = Option<T::Output>>
where
    T: Future,
{
    let timeout = tokio::time::timeout(duration, future);
    async {
        match timeout.await {
            Ok(t) => Some(t),
            Err(_) => None,
        }
    }
}

/// Sleep for `duration`, returning `false` early if `token` is cancelled first.
pub(crate) async fn sleep_unless_cancelled(duration: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
