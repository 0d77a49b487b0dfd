// Copyright 2021-Present Datadog, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

mod collector_sandbox;
mod demo_sandbox;
mod shutdown;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use tokio::net::TcpListener;

pub(crate) use self::collector_sandbox::CollectorSandbox;
pub(crate) use self::demo_sandbox::DemoServiceSandbox;

/// Polls `predicate` until it holds, failing after `timeout`.
pub(crate) async fn wait_until_predicate<Fut>(
    mut predicate: impl FnMut() -> Fut,
    timeout: Duration,
    retry_interval: Duration,
) -> anyhow::Result<()>
where
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(timeout, async {
        while !predicate().await {
            tokio::time::sleep(retry_interval).await;
        }
    })
    .await
    .map_err(|_| anyhow::anyhow!("predicate still false after {timeout:?}"))
}

/// A downstream backend answering every request with the same status code.
pub(crate) struct StubBackend {
    pub addr: SocketAddr,
    num_requests: Arc<AtomicUsize>,
}

impl StubBackend {
    pub async fn start(status_code: StatusCode) -> Self {
        let num_requests = Arc::new(AtomicUsize::new(0));
        let num_requests_clone = num_requests.clone();
        let router = Router::new().fallback(move || {
            let num_requests = num_requests_clone.clone();
            async move {
                num_requests.fetch_add(1, Ordering::Relaxed);
                status_code
            }
        });
        let tcp_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = tcp_listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(tcp_listener, router).await });
        StubBackend { addr, num_requests }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn num_requests(&self) -> usize {
        self.num_requests.load(Ordering::Relaxed)
    }
}
