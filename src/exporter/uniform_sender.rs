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

use std::net::{SocketAddr, UdpSocket};
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Weak,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use arc_swap::access::Access;
use log::{debug, error, info, warn};

use super::QUEUE_BATCH_SIZE;
use super::encoder::Encoder;
use crate::common::{get_timestamp, FlowRecord};
use crate::config::handler::{ExporterAccess, SenderAccess};
use crate::utils::{
    queue::{Error, Receiver},
    stats::{self, Counter, CounterType, CounterValue, RefCountable},
};

#[derive(Debug, Default)]
pub struct SenderCounter {
    pub rx: AtomicU64,
    pub tx: AtomicU64,
    pub tx_bytes: AtomicU64,
    pub dropped: AtomicU64,
}

impl RefCountable for SenderCounter {
    fn get_counters(&self) -> Vec<Counter> {
        vec![
            (
                "rx",
                CounterType::Counted,
                CounterValue::Unsigned(self.rx.swap(0, Ordering::Relaxed)),
            ),
            (
                "tx",
                CounterType::Counted,
                CounterValue::Unsigned(self.tx.swap(0, Ordering::Relaxed)),
            ),
            (
                "tx-bytes",
                CounterType::Counted,
                CounterValue::Unsigned(self.tx_bytes.swap(0, Ordering::Relaxed)),
            ),
            (
                "dropped",
                CounterType::Counted,
                CounterValue::Unsigned(self.dropped.swap(0, Ordering::Relaxed)),
            ),
        ]
    }
}

pub struct UniformSenderThread {
    input: Arc<Receiver<Box<FlowRecord>>>,
    config: SenderAccess,
    exporter_config: ExporterAccess,

    thread_handle: Option<JoinHandle<()>>,

    running: Arc<AtomicBool>,
    stats: Arc<stats::Collector>,
}

impl UniformSenderThread {
    pub fn new(
        input: Receiver<Box<FlowRecord>>,
        config: SenderAccess,
        exporter_config: ExporterAccess,
        stats: Arc<stats::Collector>,
    ) -> Self {
        Self {
            input: Arc::new(input),
            config,
            exporter_config,
            thread_handle: None,
            running: Arc::new(AtomicBool::new(false)),
            stats,
        }
    }

    pub fn start(&mut self) {
        if self.running.swap(true, Ordering::Relaxed) {
            warn!("uniform sender already started, do nothing.");
            return;
        }

        let mut uniform_sender = UniformSender::new(
            self.input.clone(),
            self.config.clone(),
            self.exporter_config.clone(),
            self.running.clone(),
            self.stats.clone(),
        );
        self.thread_handle = Some(
            thread::Builder::new()
                .name("uniform-sender".to_owned())
                .spawn(move || uniform_sender.process())
                .unwrap(),
        );
        info!("uniform sender started");
    }

    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::Relaxed) {
            warn!("uniform sender already stopped, do nothing.");
            return;
        }
        // wake the sender out of its queue wait so remaining snapshots are
        // flushed and the thread exits
        self.input.terminate();
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
        info!("uniform sender stopped");
    }
}

pub struct UniformSender {
    input: Arc<Receiver<Box<FlowRecord>>>,
    counter: Arc<SenderCounter>,

    encoder: Encoder,
    socket: Option<UdpSocket>,
    src: SocketAddr,
    dst: SocketAddr,

    config: SenderAccess,

    running: Arc<AtomicBool>,
}

impl UniformSender {
    const QUEUE_READ_TIMEOUT: u64 = 3; // s
    const BUFFER_LEN: usize = 2048;

    fn new(
        input: Arc<Receiver<Box<FlowRecord>>>,
        config: SenderAccess,
        exporter_config: ExporterAccess,
        running: Arc<AtomicBool>,
        stats: Arc<stats::Collector>,
    ) -> Self {
        let counter = Arc::new(SenderCounter::default());
        stats.register_countable(
            "sender",
            stats::Countable::Ref(Arc::downgrade(&counter) as Weak<dyn RefCountable>),
            vec![],
        );
        let (encoder, src, dst) = {
            let exporter = exporter_config.load();
            let cfg = config.load();
            info!(
                "exporting {}:{} -> {}:{} with {}",
                cfg.exporter_ip,
                cfg.exporter_port,
                cfg.collector_ip,
                cfg.collector_port,
                exporter.template,
            );
            (
                Encoder::new(exporter.template.clone(), exporter.observation_domain_id),
                SocketAddr::from((cfg.exporter_ip, cfg.exporter_port)),
                SocketAddr::from((cfg.collector_ip, cfg.collector_port)),
            )
        };
        Self {
            input,
            counter,
            encoder,
            socket: None,
            src,
            dst,
            config,
            running,
        }
    }

    fn update_dst_ip_and_port(&mut self) {
        let cfg = self.config.load();
        let src = SocketAddr::from((cfg.exporter_ip, cfg.exporter_port));
        let dst = SocketAddr::from((cfg.collector_ip, cfg.collector_port));
        if self.src != src || self.dst != dst {
            info!(
                "sender update export {} -> {} to {} -> {}",
                self.src, self.dst, src, dst
            );
            self.src = src;
            self.dst = dst;
            self.socket = None;
        }
    }

    fn send_record(&mut self, record: &FlowRecord, buffer: &mut Vec<u8>) {
        buffer.clear();
        let export_time_s = get_timestamp().as_secs() as u32;
        let written = match self.encoder.encode(record, export_time_s, buffer) {
            Ok(written) => written,
            Err(e) => {
                // bad template field, drop the snapshot and keep going
                warn!("encode flow record failed: {}", e);
                self.counter.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        if self.socket.is_none() {
            match UdpSocket::bind(self.src) {
                Ok(socket) => self.socket = Some(socket),
                Err(e) => {
                    if self.counter.dropped.load(Ordering::Relaxed) == 0 {
                        error!("sender bind {} failed: {}", self.src, e);
                    }
                    self.counter.dropped.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            }
        }

        let result = self.socket.as_ref().unwrap().send_to(&buffer[..], self.dst);
        match result {
            Ok(_) => {
                self.counter.tx.fetch_add(1, Ordering::Relaxed);
                self.counter
                    .tx_bytes
                    .fetch_add(written as u64, Ordering::Relaxed);
                debug!("exported flow {}", record);
            }
            Err(e) => {
                // not retried, the snapshot is dropped
                if self.counter.dropped.load(Ordering::Relaxed) == 0 {
                    error!("sender send to {} failed: {}", self.dst, e);
                }
                self.counter.dropped.fetch_add(1, Ordering::Relaxed);
                self.socket = None;
            }
        }
    }

    fn process(&mut self) {
        let mut batch = Vec::with_capacity(QUEUE_BATCH_SIZE);
        let mut buffer = Vec::with_capacity(Self::BUFFER_LEN);
        while self.running.load(Ordering::Relaxed) {
            match self.input.recv_all(
                &mut batch,
                Some(Duration::from_secs(Self::QUEUE_READ_TIMEOUT)),
            ) {
                Ok(_) => {
                    for record in batch.drain(..) {
                        self.counter.rx.fetch_add(1, Ordering::Relaxed);
                        self.send_record(&record, &mut buffer);
                    }
                }
                Err(Error::Timeout) => self.update_dst_ip_and_port(),
                Err(Error::Terminated) => break,
            }
        }
        // drain whatever is still buffered after the stop request
        while let Ok(record) = self.input.recv(None) {
            self.counter.rx.fetch_add(1, Ordering::Relaxed);
            self.send_record(&record, &mut buffer);
        }
    }
}
