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

use std::future::Future;

use tokio::sync::watch::{self, Receiver, Sender};
use tokio::task::JoinHandle;

/// Stops a server spawned by a sandbox and collects its outcome.
pub(crate) struct ShutdownHandle<T> {
    sender: Sender<()>,
    receiver: Receiver<()>,
    join_handle_opt: Option<JoinHandle<anyhow::Result<T>>>,
}

impl<T> ShutdownHandle<T> {
    pub(crate) fn new() -> Self {
        let (sender, receiver) = watch::channel(());
        Self {
            sender,
            receiver,
            join_handle_opt: None,
        }
    }

    pub(crate) fn shutdown_signal(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut receiver = self.receiver.clone();
        async move {
            let _ = receiver.changed().await;
        }
    }

    pub(crate) fn set_join_handle(&mut self, join_handle: JoinHandle<anyhow::Result<T>>) {
        self.join_handle_opt = Some(join_handle);
    }

    /// Initiates the shutdown and waits for it to complete.
    pub(crate) async fn shutdown(self) -> anyhow::Result<T> {
        self.sender.send(()).unwrap();
        self.join_handle_opt
            .expect("join handle was not set before shutdown")
            .await
            .unwrap()
    }
}
