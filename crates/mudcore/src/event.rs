//! 事件匯流排
//!
//! 具名頻道、依優先級排序的監聽者、同步派送。
//! 數字越小越先執行；同優先級依訂閱順序。

use std::collections::HashMap;
use std::rc::Rc;

use tracing::{trace, warn};

use crate::error::ScriptError;
use crate::plugin::PluginId;
use crate::telnet::MsdpValue;

/// 事件內容
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventMessage {
    Empty,
    Text(String),
    Flag(bool),
    Msdp { variable: String, value: MsdpValue },
}

impl EventMessage {
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// 事件處理器
pub type EventHandler<C> = Rc<dyn Fn(&mut C, &EventMessage) -> Result<(), ScriptError>>;

/// 訂閱代碼，用於取消訂閱
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

struct Listener<C> {
    id: HandlerId,
    priority: i32,
    owner: Option<PluginId>,
    handler: EventHandler<C>,
}

/// 訂閱資訊（列表與測試用）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub event: String,
    pub priority: i32,
    pub owner: Option<PluginId>,
}

pub struct EventBus<C> {
    channels: HashMap<String, Vec<Listener<C>>>,
    next_id: u64,
}

impl<C> Default for EventBus<C> {
    fn default() -> Self {
        Self {
            channels: HashMap::new(),
            next_id: 0,
        }
    }
}

impl<C> EventBus<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 訂閱事件
    pub fn subscribe(
        &mut self,
        event: impl Into<String>,
        priority: i32,
        owner: Option<PluginId>,
        handler: EventHandler<C>,
    ) -> HandlerId {
        self.next_id += 1;
        let id = HandlerId(self.next_id);
        let listeners = self.channels.entry(event.into()).or_default();
        let pos = listeners.partition_point(|l| l.priority <= priority);
        listeners.insert(
            pos,
            Listener {
                id,
                priority,
                owner,
                handler,
            },
        );
        id
    }

    /// 取消訂閱；重複呼叫不會出錯
    pub fn unsubscribe(&mut self, id: HandlerId) -> bool {
        let mut removed = false;
        for listeners in self.channels.values_mut() {
            let before = listeners.len();
            listeners.retain(|l| l.id != id);
            removed |= listeners.len() != before;
        }
        self.channels.retain(|_, l| !l.is_empty());
        removed
    }

    /// 移除某外掛的所有訂閱，回傳移除數量
    pub fn unregister_owner(&mut self, owner: &PluginId) -> usize {
        let mut removed = 0;
        for listeners in self.channels.values_mut() {
            let before = listeners.len();
            listeners.retain(|l| l.owner.as_ref() != Some(owner));
            removed += before - listeners.len();
        }
        self.channels.retain(|_, l| !l.is_empty());
        removed
    }

    /// 依執行順序取出某事件的處理器快照
    ///
    /// 派送時使用快照，處理器內可以安全地訂閱或取消訂閱。
    pub fn listeners(&self, event: &str) -> Vec<EventHandler<C>> {
        self.channels
            .get(event)
            .map(|ls| ls.iter().map(|l| Rc::clone(&l.handler)).collect())
            .unwrap_or_default()
    }

    pub fn has_listeners(&self, event: &str) -> bool {
        self.channels.contains_key(event)
    }

    /// 派送事件；單一處理器失敗不影響其他處理器，錯誤全部回傳
    pub fn dispatch(&self, ctx: &mut C, event: &str, message: &EventMessage) -> Vec<ScriptError> {
        invoke_all(self.listeners(event), ctx, event, message)
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        let mut subs: Vec<Subscription> = self
            .channels
            .iter()
            .flat_map(|(event, ls)| {
                ls.iter().map(move |l| Subscription {
                    event: event.clone(),
                    priority: l.priority,
                    owner: l.owner.clone(),
                })
            })
            .collect();
        subs.sort_by(|a, b| (&a.event, a.priority).cmp(&(&b.event, b.priority)));
        subs
    }
}

/// 依序呼叫處理器，收集錯誤
pub fn invoke_all<C>(
    handlers: Vec<EventHandler<C>>,
    ctx: &mut C,
    event: &str,
    message: &EventMessage,
) -> Vec<ScriptError> {
    trace!("派送事件 {} 給 {} 個處理器", event, handlers.len());
    let mut errors = Vec::new();
    for handler in handlers {
        if let Err(e) = handler(ctx, message) {
            warn!("事件 {} 處理器失敗: {}", event, e);
            errors.push(e);
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
    }

    fn recorder(tag: &'static str) -> EventHandler<Recorder> {
        Rc::new(move |r: &mut Recorder, msg: &EventMessage| {
            r.calls.push(format!("{}:{}", tag, msg.text().unwrap_or("")));
            Ok(())
        })
    }

    #[test]
    fn test_priority_order() {
        let mut bus = EventBus::new();
        bus.subscribe("prompt", 10, None, recorder("late"));
        bus.subscribe("prompt", -5, None, recorder("early"));
        bus.subscribe("prompt", 10, None, recorder("later"));
        let mut r = Recorder::default();
        let errors = bus.dispatch(&mut r, "prompt", &EventMessage::Text("x".into()));
        assert!(errors.is_empty());
        assert_eq!(r.calls, vec!["early:x", "late:x", "later:x"]);
    }

    #[test]
    fn test_dispatch_order_across_events() {
        let mut bus = EventBus::new();
        bus.subscribe("a", 0, None, recorder("a1"));
        bus.subscribe("a", 1, None, recorder("a2"));
        bus.subscribe("b", 0, None, recorder("b1"));
        let mut r = Recorder::default();
        bus.dispatch(&mut r, "a", &EventMessage::Empty);
        bus.dispatch(&mut r, "b", &EventMessage::Empty);
        assert_eq!(r.calls, vec!["a1:", "a2:", "b1:"]);
    }

    #[test]
    fn test_failing_handler_does_not_abort_others() {
        let mut bus = EventBus::new();
        bus.subscribe(
            "x",
            0,
            None,
            Rc::new(|_: &mut Recorder, _: &EventMessage| Err(ScriptError::msg("boom"))),
        );
        bus.subscribe("x", 1, None, recorder("ok"));
        let mut r = Recorder::default();
        let errors = bus.dispatch(&mut r, "x", &EventMessage::Empty);
        assert_eq!(errors.len(), 1);
        assert_eq!(r.calls, vec!["ok:"]);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let mut bus = EventBus::new();
        let id = bus.subscribe("x", 0, None, recorder("a"));
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert!(!bus.has_listeners("x"));
    }

    #[test]
    fn test_unregister_owner_restores_state() {
        let mut bus = EventBus::new();
        bus.subscribe("x", 0, None, recorder("core"));
        let before = bus.subscriptions();
        let owner = PluginId::new("Hunter");
        bus.subscribe("x", 5, Some(owner.clone()), recorder("p1"));
        bus.subscribe("msdp", 0, Some(owner.clone()), recorder("p2"));
        assert_eq!(bus.unregister_owner(&owner), 2);
        assert_eq!(bus.subscriptions(), before);
    }
}
