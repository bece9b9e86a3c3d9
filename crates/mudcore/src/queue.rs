//! 排程命令佇列
//!
//! MUD 伺服器會限制輸入速率；每個 task 的 `duration` 代表它在伺服器端佔用的時間，
//! 在這段時間內不會送出下一個 task。多個具名佇列共用一條依
//! `(佇列優先級, task 優先級, id)` 排序的清單。

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, trace};

pub const DEFAULT_QUEUE: &str = "default";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("尚未設定命令輸出函式")]
    NoInserter,

    #[error("找不到 task #{0}")]
    UnknownTask(u64),
}

/// 可否送出的判斷函式，每次排程都會重新評估
pub type Predicate = Rc<dyn Fn() -> bool>;

/// 把 task 的命令送出去的函式
pub type Inserter = Box<dyn FnMut(&Task)>;

#[derive(Clone)]
pub struct Task {
    pub id: u64,
    pub command: String,
    pub queue: String,
    pub priority: i32,
    pub duration: Duration,
    pub delay: Duration,
    /// 零表示不逾時
    pub timeout: Duration,
    pub enqueued_at: Option<Instant>,
    pub predecessor: Option<u64>,
    pub inserted: bool,
    queue_priority: i32,
    predicate: Option<Predicate>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("command", &self.command)
            .field("queue", &self.queue)
            .field("priority", &self.priority)
            .field("duration", &self.duration)
            .field("delay", &self.delay)
            .field("timeout", &self.timeout)
            .field("predecessor", &self.predecessor)
            .field("inserted", &self.inserted)
            .finish()
    }
}

impl Task {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            id: 0,
            command: command.into(),
            queue: DEFAULT_QUEUE.to_string(),
            priority: 0,
            duration: Duration::ZERO,
            delay: Duration::ZERO,
            timeout: Duration::ZERO,
            enqueued_at: None,
            predecessor: None,
            inserted: false,
            queue_priority: 0,
            predicate: None,
        }
    }

    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn when(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    fn sort_key(&self) -> (i32, i32, u64) {
        (self.queue_priority, self.priority, self.id)
    }

    fn timed_out(&self, now: Instant) -> bool {
        match self.enqueued_at {
            Some(at) => !self.timeout.is_zero() && now.saturating_duration_since(at) > self.timeout,
            None => false,
        }
    }
}

struct TaskQueue {
    priority: i32,
    predicate: Option<Predicate>,
}

/// 佇列資訊（列表用）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    pub name: String,
    pub priority: i32,
    pub pending: usize,
}

pub struct TaskQueueEngine {
    queues: HashMap<String, TaskQueue>,
    tasks: Vec<Task>,
    next_id: u64,
    next_command_time: Option<Instant>,
    inserter: Option<Inserter>,
}

impl Default for TaskQueueEngine {
    fn default() -> Self {
        let mut queues = HashMap::new();
        queues.insert(
            DEFAULT_QUEUE.to_string(),
            TaskQueue {
                priority: 0,
                predicate: None,
            },
        );
        Self {
            queues,
            tasks: Vec::new(),
            next_id: 0,
            next_command_time: None,
            inserter: None,
        }
    }
}

impl TaskQueueEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_inserter(&mut self, inserter: Inserter) {
        self.inserter = Some(inserter);
    }

    /// 建立或更新具名佇列
    pub fn set_queue(&mut self, name: impl Into<String>, priority: i32, predicate: Option<Predicate>) {
        let name = name.into();
        for task in self.tasks.iter_mut().filter(|t| t.queue == name) {
            task.queue_priority = priority;
        }
        self.tasks.sort_by_key(Task::sort_key);
        self.queues.insert(name, TaskQueue { priority, predicate });
    }

    pub fn queues(&self) -> Vec<QueueInfo> {
        let mut infos: Vec<QueueInfo> = self
            .queues
            .iter()
            .map(|(name, q)| QueueInfo {
                name: name.clone(),
                priority: q.priority,
                pending: self.tasks.iter().filter(|t| &t.queue == name).count(),
            })
            .collect();
        infos.sort_by(|a, b| (a.priority, &a.name).cmp(&(b.priority, &b.name)));
        infos
    }

    /// 等待中的 task，依排序順序
    pub fn pending(&self) -> &[Task] {
        &self.tasks
    }

    pub fn next_command_time(&self) -> Option<Instant> {
        self.next_command_time
    }

    fn enqueue(&mut self, mut task: Task, now: Instant) -> u64 {
        if !self.queues.contains_key(&task.queue) {
            debug!("未知佇列 {}，改用 {}", task.queue, DEFAULT_QUEUE);
            task.queue = DEFAULT_QUEUE.to_string();
        }
        self.next_id += 1;
        task.id = self.next_id;
        task.enqueued_at = Some(now);
        task.inserted = false;
        task.queue_priority = self.queues.get(&task.queue).map(|q| q.priority).unwrap_or(0);
        let key = task.sort_key();
        let pos = self.tasks.partition_point(|t| t.sort_key() < key);
        let id = task.id;
        trace!("加入 task #{} '{}' 至 {}", id, task.command, task.queue);
        self.tasks.insert(pos, task);
        id
    }

    /// 加入一個 task，並立即執行一次排程
    pub fn add(&mut self, task: Task, now: Instant) -> u64 {
        let id = self.enqueue(task, now);
        self.run_if_ready(now);
        id
    }

    /// 加入一串 task；每個 task 要等前一個送出後才能送出
    pub fn add_chain(&mut self, tasks: Vec<Task>, now: Instant) -> Vec<u64> {
        let mut ids = Vec::with_capacity(tasks.len());
        let mut previous = None;
        for mut task in tasks {
            task.predecessor = previous;
            let id = self.enqueue(task, now);
            previous = Some(id);
            ids.push(id);
        }
        self.run_if_ready(now);
        ids
    }

    fn run_if_ready(&mut self, now: Instant) {
        if self.inserter.is_some() {
            // 只有在沒有輸出函式時 run 才會失敗
            let _ = self.run(now);
        }
    }

    fn insertable(&self, task: &Task, now: Instant) -> bool {
        if let Some(at) = task.enqueued_at {
            if now < at + task.delay {
                return false;
            }
        }
        if let Some(pred) = self.queues.get(&task.queue).and_then(|q| q.predicate.as_ref()) {
            if !pred() {
                return false;
            }
        }
        if let Some(pred) = &task.predicate {
            if !pred() {
                return false;
            }
        }
        match task.predecessor {
            Some(prev) => !self.tasks.iter().any(|t| t.id == prev),
            None => true,
        }
    }

    /// 移除逾時的 task；串鏈中的後續 task 一併移除
    fn evict_timed_out(&mut self, now: Instant) {
        let mut dropped: HashSet<u64> = self
            .tasks
            .iter()
            .filter(|t| t.timed_out(now))
            .map(|t| t.id)
            .collect();
        if dropped.is_empty() {
            return;
        }
        loop {
            let more: Vec<u64> = self
                .tasks
                .iter()
                .filter(|t| !dropped.contains(&t.id))
                .filter(|t| t.predecessor.is_some_and(|p| dropped.contains(&p)))
                .map(|t| t.id)
                .collect();
            if more.is_empty() {
                break;
            }
            dropped.extend(more);
        }
        debug!("移除 {} 個逾時 task", dropped.len());
        self.tasks.retain(|t| !dropped.contains(&t.id));
    }

    /// 排程一步：移除逾時 task，然後在時間閘門允許時送出可送出的 task
    pub fn run(&mut self, now: Instant) -> Result<usize, QueueError> {
        let mut inserter = self.inserter.take().ok_or(QueueError::NoInserter)?;
        self.evict_timed_out(now);

        let mut count = 0;
        while self.next_command_time.map_or(true, |t| now >= t) {
            let Some(index) = self.tasks.iter().position(|t| self.insertable(t, now)) else {
                break;
            };
            let mut task = self.tasks.remove(index);
            task.inserted = true;
            debug!("送出 task #{} '{}'", task.id, task.command);
            inserter(&task);
            self.next_command_time = Some(now + task.duration);
            count += 1;
        }

        self.inserter = Some(inserter);
        Ok(count)
    }

    /// 清空佇列；名稱為空時清空全部
    pub fn flush(&mut self, queue: &str) -> usize {
        let before = self.tasks.len();
        if queue.is_empty() {
            self.tasks.clear();
        } else {
            self.tasks.retain(|t| t.queue != queue);
        }
        let remaining: HashSet<u64> = self.tasks.iter().map(|t| t.id).collect();
        for task in &mut self.tasks {
            if task.predecessor.is_some_and(|p| !remaining.contains(&p)) {
                task.predecessor = None;
            }
        }
        before - self.tasks.len()
    }

    /// 移除單一 task
    pub fn remove(&mut self, id: u64) -> Result<Task, QueueError> {
        let index = self
            .tasks
            .iter()
            .position(|t| t.id == id)
            .ok_or(QueueError::UnknownTask(id))?;
        let task = self.tasks.remove(index);
        for t in &mut self.tasks {
            if t.predecessor == Some(id) {
                t.predecessor = task.predecessor;
            }
        }
        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    fn recording_engine() -> (TaskQueueEngine, Rc<RefCell<Vec<String>>>) {
        let sent = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&sent);
        let mut engine = TaskQueueEngine::new();
        engine.set_inserter(Box::new(move |task: &Task| {
            sink.borrow_mut().push(task.command.clone())
        }));
        (engine, sent)
    }

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[test]
    fn test_no_inserter() {
        let mut engine = TaskQueueEngine::new();
        engine.add(Task::new("look"), Instant::now());
        assert_eq!(engine.run(Instant::now()), Err(QueueError::NoInserter));
        assert_eq!(engine.pending().len(), 1);
    }

    #[test]
    fn test_zero_task_inserted_immediately() {
        let (mut engine, sent) = recording_engine();
        engine.add(Task::new("look"), Instant::now());
        assert_eq!(*sent.borrow(), vec!["look"]);
        assert!(engine.pending().is_empty());
    }

    #[test]
    fn test_chain_scenario() {
        let (mut engine, sent) = recording_engine();
        engine.set_queue("move", 0, None);
        let t0 = Instant::now();
        engine.add_chain(
            vec![
                Task::new("open door north").queue("move").duration(secs(0.5)),
                Task::new("north").queue("move").duration(secs(0.5)),
            ],
            t0,
        );
        assert_eq!(*sent.borrow(), vec!["open door north"]);
        engine.run(t0 + secs(0.25)).unwrap();
        assert_eq!(sent.borrow().len(), 1);
        assert_eq!(engine.run(t0 + secs(0.5)).unwrap(), 1);
        assert_eq!(*sent.borrow(), vec!["open door north", "north"]);
        assert_eq!(engine.run(t0 + secs(0.5)).unwrap(), 0);
    }

    #[test]
    fn test_duration_gap_respected() {
        let (mut engine, sent) = recording_engine();
        let t0 = Instant::now();
        engine.add(Task::new("a").duration(secs(1.0)), t0);
        engine.add(Task::new("b").duration(secs(1.0)), t0);
        assert_eq!(sent.borrow().len(), 1);
        engine.run(t0 + secs(0.99)).unwrap();
        assert_eq!(sent.borrow().len(), 1);
        engine.run(t0 + secs(1.0)).unwrap();
        assert_eq!(*sent.borrow(), vec!["a", "b"]);
    }

    #[test]
    fn test_priority_ordering() {
        let sent = Rc::new(RefCell::new(Vec::new()));
        let mut engine = TaskQueueEngine::new();
        engine.set_queue("urgent", -10, None);
        let t0 = Instant::now();
        engine.add(Task::new("low").priority(5), t0);
        engine.add(Task::new("high").priority(-5), t0);
        engine.add(Task::new("flee").queue("urgent").priority(100), t0);
        let sink = Rc::clone(&sent);
        engine.set_inserter(Box::new(move |t: &Task| sink.borrow_mut().push(t.command.clone())));
        engine.run(t0).unwrap();
        assert_eq!(*sent.borrow(), vec!["flee", "high", "low"]);
    }

    #[test]
    fn test_delay() {
        let (mut engine, sent) = recording_engine();
        let t0 = Instant::now();
        engine.add(Task::new("later").delay(secs(2.0)), t0);
        assert!(sent.borrow().is_empty());
        engine.run(t0 + secs(1.0)).unwrap();
        assert!(sent.borrow().is_empty());
        engine.run(t0 + secs(2.0)).unwrap();
        assert_eq!(*sent.borrow(), vec!["later"]);
    }

    #[test]
    fn test_timeout_evicts_chain() {
        let (mut engine, sent) = recording_engine();
        let blocked = Rc::new(Cell::new(true));
        let gate = Rc::clone(&blocked);
        let t0 = Instant::now();
        engine.add_chain(
            vec![
                Task::new("open door")
                    .timeout(secs(1.0))
                    .when(Rc::new(move || !gate.get())),
                Task::new("north"),
            ],
            t0,
        );
        engine.run(t0 + secs(1.5)).unwrap();
        blocked.set(false);
        engine.run(t0 + secs(2.0)).unwrap();
        assert!(sent.borrow().is_empty());
        assert!(engine.pending().is_empty());
    }

    #[test]
    fn test_queue_predicate() {
        let (mut engine, sent) = recording_engine();
        let open = Rc::new(Cell::new(false));
        let gate = Rc::clone(&open);
        engine.set_queue("combat", 0, Some(Rc::new(move || gate.get())));
        let t0 = Instant::now();
        engine.add(Task::new("kick").queue("combat"), t0);
        assert!(sent.borrow().is_empty());
        open.set(true);
        engine.run(t0).unwrap();
        assert_eq!(*sent.borrow(), vec!["kick"]);
    }

    #[test]
    fn test_unknown_queue_uses_default() {
        let mut engine = TaskQueueEngine::new();
        engine.add(Task::new("x").queue("nowhere"), Instant::now());
        assert_eq!(engine.pending()[0].queue, DEFAULT_QUEUE);
    }

    #[test]
    fn test_flush_clears_dangling_predecessor() {
        let mut engine = TaskQueueEngine::new();
        engine.set_queue("move", 0, None);
        let t0 = Instant::now();
        engine.add_chain(
            vec![Task::new("open").queue("move"), Task::new("say hi")],
            t0,
        );
        assert_eq!(engine.flush("move"), 1);
        assert_eq!(engine.pending().len(), 1);
        assert_eq!(engine.pending()[0].predecessor, None);
        assert_eq!(engine.flush(""), 1);
    }

    #[test]
    fn test_remove_unknown() {
        let mut engine = TaskQueueEngine::new();
        assert_eq!(engine.remove(42).unwrap_err(), QueueError::UnknownTask(42));
    }
}
