/*
 * Copyright (c) 2024 Yunshan Networks
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use arc_swap::access::Access;
use log::{info, warn};

use super::FlowMap;
use crate::common::get_timestamp;
use crate::config::handler::FlowAccess;

/// Drives flow expiry: sleeps for the poll period, wakes, and runs one
/// scan pass over the table. Stopping wakes the thread early; the scan
/// after the final wakeup runs with an infinite timestamp so every live
/// flow is evicted and exported before shutdown.
pub struct ExpiryScheduler {
    flow_map: Arc<FlowMap>,
    config: FlowAccess,

    thread: Mutex<Option<JoinHandle<()>>>,
    running: Arc<(Mutex<bool>, Condvar)>,
}

impl ExpiryScheduler {
    pub fn new(flow_map: Arc<FlowMap>, config: FlowAccess) -> Self {
        Self {
            flow_map,
            config,
            thread: Mutex::new(None),
            running: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    pub fn start(&self) {
        {
            let (started, _) = &*self.running;
            let mut started = started.lock().unwrap();
            if *started {
                warn!("flow expiry scheduler already started, do nothing.");
                return;
            }
            *started = true;
        }

        let flow_map = self.flow_map.clone();
        let config = self.config.clone();
        let running = self.running.clone();
        let thread = thread::Builder::new()
            .name("flow-expiry".to_owned())
            .spawn(move || {
                loop {
                    // a wait cut short by a stop notification still ran a
                    // full period the next time around, there is no
                    // partial-period carry over
                    let poll_period = config.load().poll_period;
                    {
                        let (running, timer) = &*running;
                        let mut running = running.lock().unwrap();
                        if !*running {
                            break;
                        }
                        running = timer.wait_timeout(running, poll_period).unwrap().0;
                        if !*running {
                            break;
                        }
                    }
                    flow_map.scan_expired(get_timestamp().as_millis() as u64);
                }
                // final pass: expire everything still tracked
                flow_map.flush();
            })
            .unwrap();
        self.thread.lock().unwrap().replace(thread);
        info!("flow expiry scheduler started");
    }

    pub fn stop(&self) {
        {
            let (running, timer) = &*self.running;
            let mut running = running.lock().unwrap();
            if !*running {
                warn!("flow expiry scheduler already stopped, do nothing.");
                return;
            }
            *running = false;
            timer.notify_one();
        }
        if let Some(thread) = self.thread.lock().unwrap().take() {
            let _ = thread.join();
        }
        info!("flow expiry scheduler stopped");
    }
}
