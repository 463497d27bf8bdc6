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

use std::fmt::Write as _;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{info, warn};

const TICK_CYCLE: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug)]
pub enum CounterType {
    Counted,
    Gauged,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CounterValue {
    Signed(i64),
    Unsigned(u64),
    Float(f64),
}

pub type Counter = (&'static str, CounterType, CounterValue);

pub trait RefCountable: Send + Sync {
    fn get_counters(&self) -> Vec<Counter>;
}

pub trait OwnedCountable: Send + Sync {
    fn get_counters(&self) -> Vec<Counter>;
    fn closed(&self) -> bool;
}

pub enum Countable {
    Owned(Box<dyn OwnedCountable>),
    Ref(Weak<dyn RefCountable>),
}

impl Countable {
    fn get_counters(&self) -> Vec<Counter> {
        match self {
            Countable::Owned(c) => c.get_counters(),
            Countable::Ref(c) => c.upgrade().map(|c| c.get_counters()).unwrap_or_default(),
        }
    }

    fn closed(&self) -> bool {
        match self {
            Countable::Owned(c) => c.closed(),
            Countable::Ref(c) => c.strong_count() == 0,
        }
    }
}

pub enum StatsOption {
    Tag(&'static str, String),
}

struct Source {
    module: &'static str,
    countable: Countable,
    tags: Vec<(&'static str, String)>,
}

// Periodically snapshots every registered counter source and writes the
// values to the agent log. Closed sources are dropped on the next tick.
pub struct Collector {
    sources: Arc<Mutex<Vec<Source>>>,
    running: Arc<(Mutex<bool>, Condvar)>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Collector {
    pub fn new() -> Self {
        Self {
            sources: Arc::new(Mutex::new(vec![])),
            running: Arc::new((Mutex::new(false), Condvar::new())),
            thread: Mutex::new(None),
        }
    }

    pub fn register_countable(
        &self,
        module: &'static str,
        countable: Countable,
        options: Vec<StatsOption>,
    ) {
        let mut source = Source {
            module,
            countable,
            tags: vec![],
        };
        for option in options {
            match option {
                StatsOption::Tag(key, value) if !source.tags.iter().any(|(k, _)| k == &key) => {
                    source.tags.push((key, value))
                }
                _ => warn!("duplicated tag in countable {} options", module),
            }
        }
        let mut sources = self.sources.lock().unwrap();
        sources.retain(|s| !(s.module == source.module && s.tags == source.tags));
        sources.push(source);
    }

    pub fn start(&self) {
        {
            let (started, _) = &*self.running;
            let mut started = started.lock().unwrap();
            if *started {
                return;
            }
            *started = true;
        }
        let sources = self.sources.clone();
        let running = self.running.clone();
        let thread = thread::Builder::new()
            .name("stats-collector".to_owned())
            .spawn(move || loop {
                {
                    let (running, timer) = &*running;
                    let mut running = running.lock().unwrap();
                    if !*running {
                        break;
                    }
                    running = timer.wait_timeout(running, TICK_CYCLE).unwrap().0;
                    if !*running {
                        break;
                    }
                }
                let mut sources = sources.lock().unwrap();
                sources.retain(|s| !s.countable.closed());
                for source in sources.iter() {
                    let points = source.countable.get_counters();
                    if points.is_empty() {
                        continue;
                    }
                    let mut line = String::with_capacity(128);
                    for (key, value) in source.tags.iter() {
                        let _ = write!(line, " {}={}", key, value);
                    }
                    for (name, _, value) in points {
                        match value {
                            CounterValue::Signed(v) => _ = write!(line, " {}={}", name, v),
                            CounterValue::Unsigned(v) => _ = write!(line, " {}={}", name, v),
                            CounterValue::Float(v) => _ = write!(line, " {}={}", name, v),
                        }
                    }
                    info!("stats [{}]{}", source.module, line);
                }
            })
            .unwrap();
        self.thread.lock().unwrap().replace(thread);
        info!("stats collector started");
    }

    pub fn stop(&self) {
        {
            let (running, timer) = &*self.running;
            let mut running = running.lock().unwrap();
            if !*running {
                return;
            }
            *running = false;
            timer.notify_one();
        }
        if let Some(thread) = self.thread.lock().unwrap().take() {
            let _ = thread.join();
        }
        info!("stats collector stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    #[derive(Default)]
    struct TestCounter(AtomicU64);

    impl RefCountable for TestCounter {
        fn get_counters(&self) -> Vec<Counter> {
            vec![(
                "value",
                CounterType::Counted,
                CounterValue::Unsigned(self.0.swap(0, Ordering::Relaxed)),
            )]
        }
    }

    #[test]
    fn register_replaces_same_source() {
        let collector = Collector::new();
        let counter = Arc::new(TestCounter::default());
        for _ in 0..2 {
            collector.register_countable(
                "test",
                Countable::Ref(Arc::downgrade(&counter) as Weak<dyn RefCountable>),
                vec![StatsOption::Tag("id", "0".to_owned())],
            );
        }
        assert_eq!(collector.sources.lock().unwrap().len(), 1);
    }

    #[test]
    fn ref_countable_expires() {
        let counter = Arc::new(TestCounter::default());
        let countable = Countable::Ref(Arc::downgrade(&counter) as Weak<dyn RefCountable>);
        assert!(!countable.closed());
        drop(counter);
        assert!(countable.closed());
    }
}
