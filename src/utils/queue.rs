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

use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Condvar, Mutex, Weak,
};
use std::time::{Duration, Instant};

use thiserror::Error;

use super::stats::{Counter as StatsCounter, CounterType, CounterValue, OwnedCountable};

#[derive(Debug, Error, PartialEq)]
pub enum Error {
    #[error("the queue receiving operation has timed out")]
    Timeout,
    #[error("the queue has terminated")]
    Terminated,
}

#[derive(Debug, Default)]
pub struct Counter {
    pub input: AtomicU64,
    pub output: AtomicU64,
    pub overwritten: AtomicU64,
}

// fixed size MPSC queue, overwrites the oldest entry when full
struct Queue<T> {
    size: usize,
    buffer: Mutex<VecDeque<T>>,
    notify: Condvar,
    terminated: AtomicBool,
    counter: Counter,
}

pub fn bounded<T>(size: usize) -> (Sender<T>, Receiver<T>, StatsHandle<T>) {
    let size = size.next_power_of_two();
    let queue = Arc::new(Queue {
        size,
        buffer: Mutex::new(VecDeque::with_capacity(size)),
        notify: Condvar::new(),
        terminated: AtomicBool::new(false),
        counter: Counter::default(),
    });
    (
        Sender(queue.clone()),
        Receiver(queue.clone()),
        StatsHandle(Arc::downgrade(&queue)),
    )
}

pub struct Sender<T>(Arc<Queue<T>>);

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Sender<T> {
    pub fn send(&self, msg: T) -> Result<(), Error> {
        let q = &*self.0;
        if q.terminated.load(Ordering::Acquire) {
            return Err(Error::Terminated);
        }
        let mut buffer = q.buffer.lock().unwrap();
        if buffer.len() >= q.size {
            buffer.pop_front();
            q.counter.overwritten.fetch_add(1, Ordering::Relaxed);
        }
        buffer.push_back(msg);
        q.counter.input.fetch_add(1, Ordering::Relaxed);
        q.notify.notify_one();
        Ok(())
    }

    pub fn send_all(&self, msgs: &mut Vec<T>) -> Result<(), Error> {
        let q = &*self.0;
        if q.terminated.load(Ordering::Acquire) {
            msgs.clear();
            return Err(Error::Terminated);
        }
        let count = msgs.len() as u64;
        let mut buffer = q.buffer.lock().unwrap();
        for msg in msgs.drain(..) {
            if buffer.len() >= q.size {
                buffer.pop_front();
                q.counter.overwritten.fetch_add(1, Ordering::Relaxed);
            }
            buffer.push_back(msg);
        }
        q.counter.input.fetch_add(count, Ordering::Relaxed);
        q.notify.notify_one();
        Ok(())
    }

    pub fn terminate(&self) {
        self.0.terminated.store(true, Ordering::Release);
        self.0.notify.notify_all();
    }
}

pub struct Receiver<T>(Arc<Queue<T>>);

impl<T> Receiver<T> {
    // Receives a single entry. Termination is only reported after the
    // buffer has been drained so no message is lost on shutdown.
    pub fn recv(&self, timeout: Option<Duration>) -> Result<T, Error> {
        let q = &*self.0;
        let mut buffer = self.wait(timeout)?;
        match buffer.pop_front() {
            Some(msg) => {
                q.counter.output.fetch_add(1, Ordering::Relaxed);
                Ok(msg)
            }
            None => Err(Error::Terminated),
        }
    }

    // Moves every buffered entry into `batch`, waiting up to `timeout` for
    // the first one. `batch` is cleared before filling.
    pub fn recv_all(&self, batch: &mut Vec<T>, timeout: Option<Duration>) -> Result<(), Error> {
        batch.clear();
        let q = &*self.0;
        let mut buffer = self.wait(timeout)?;
        if buffer.is_empty() {
            return Err(Error::Terminated);
        }
        batch.extend(buffer.drain(..));
        q.counter.output.fetch_add(batch.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    fn wait(&self, timeout: Option<Duration>) -> Result<std::sync::MutexGuard<'_, VecDeque<T>>, Error> {
        let q = &*self.0;
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut buffer = q.buffer.lock().unwrap();
        while buffer.is_empty() {
            if q.terminated.load(Ordering::Acquire) {
                return Ok(buffer);
            }
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::Timeout);
                    }
                    let (guard, result) = q.notify.wait_timeout(buffer, deadline - now).unwrap();
                    buffer = guard;
                    if result.timed_out() && buffer.is_empty() {
                        if q.terminated.load(Ordering::Acquire) {
                            return Ok(buffer);
                        }
                        return Err(Error::Timeout);
                    }
                }
                None => buffer = q.notify.wait(buffer).unwrap(),
            }
        }
        Ok(buffer)
    }

    pub fn terminate(&self) {
        self.0.terminated.store(true, Ordering::Release);
        self.0.notify.notify_all();
    }
}

pub struct StatsHandle<T>(Weak<Queue<T>>);

impl<T: 'static + Send + Sync> OwnedCountable for StatsHandle<T> {
    fn get_counters(&self) -> Vec<StatsCounter> {
        match self.0.upgrade() {
            Some(q) => vec![
                (
                    "in",
                    CounterType::Counted,
                    CounterValue::Unsigned(q.counter.input.swap(0, Ordering::Relaxed)),
                ),
                (
                    "out",
                    CounterType::Counted,
                    CounterValue::Unsigned(q.counter.output.swap(0, Ordering::Relaxed)),
                ),
                (
                    "overwritten",
                    CounterType::Counted,
                    CounterValue::Unsigned(q.counter.overwritten.swap(0, Ordering::Relaxed)),
                ),
                (
                    "pending",
                    CounterType::Gauged,
                    CounterValue::Unsigned(q.buffer.lock().unwrap().len() as u64),
                ),
            ],
            None => vec![],
        }
    }

    fn closed(&self) -> bool {
        self.0.strong_count() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn send_recv() {
        let (s, r, _) = bounded::<u32>(16);
        s.send(1).unwrap();
        s.send(2).unwrap();
        assert_eq!(r.recv(None), Ok(1));
        assert_eq!(r.recv(None), Ok(2));
        assert_eq!(r.recv(Some(Duration::from_millis(10))), Err(Error::Timeout));
    }

    #[test]
    fn overwrite_when_full() {
        let (s, r, _) = bounded::<u32>(4);
        for i in 0..6 {
            s.send(i).unwrap();
        }
        let mut batch = vec![];
        r.recv_all(&mut batch, None).unwrap();
        assert_eq!(batch, vec![2, 3, 4, 5]);
    }

    #[test]
    fn drain_after_terminate() {
        let (s, r, _) = bounded::<u32>(16);
        s.send(7).unwrap();
        s.terminate();
        assert_eq!(s.send(8), Err(Error::Terminated));
        // buffered message survives termination
        assert_eq!(r.recv(None), Ok(7));
        assert_eq!(r.recv(None), Err(Error::Terminated));
    }

    #[test]
    fn terminate_wakes_receiver() {
        let (s, r, _) = bounded::<u32>(16);
        let handle = thread::spawn(move || r.recv(None));
        thread::sleep(Duration::from_millis(20));
        s.terminate();
        assert_eq!(handle.join().unwrap(), Err(Error::Terminated));
    }
}
