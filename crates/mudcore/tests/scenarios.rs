//! 端對端情境：位元組進、位元組出

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use mudcore::atlas::{Exit, PathOptions, TravelerState};
use mudcore::screen::{SharedScreen, Style};
use mudcore::{
    Atlas, EventMessage, PluginCatalog, Session, SessionConfig, Task, TaskQueueEngine,
};

fn session() -> (Session, SharedScreen, mpsc::UnboundedReceiver<Vec<u8>>) {
    let screen = SharedScreen::new(500);
    let mut session = Session::new(
        SessionConfig::new("scenario"),
        Atlas::in_memory().shared(),
        Rc::new(PluginCatalog::standard()),
        Box::new(screen.clone()),
    )
    .unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    session.attach_writer(tx);
    (session, screen, rx)
}

fn chunks(rx: &mut mpsc::UnboundedReceiver<Vec<u8>>) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    while let Ok(chunk) = rx.try_recv() {
        out.push(chunk);
    }
    out
}

#[test]
fn test_msdp_hello() {
    let (mut session, _screen, mut rx) = session();
    session.feed(&[0xFF, 0xFB, 0x45]);

    let mut list = vec![0xFF, 0xFA, 0x45, 0x01];
    list.extend_from_slice(b"LIST");
    list.push(0x02);
    list.extend_from_slice(b"REPORTABLE_VARIABLES");
    list.extend_from_slice(&[0xFF, 0xF0]);
    assert_eq!(chunks(&mut rx), vec![vec![0xFF, 0xFD, 0x45], list]);
}

#[test]
fn test_msdp_variable_update() {
    let (mut session, _screen, _rx) = session();
    let seen: Rc<RefCell<Vec<(String, String)>>> = Rc::default();
    for event in ["msdp", "msdp.HEALTH"] {
        let seen = Rc::clone(&seen);
        session.events.subscribe(
            event,
            0,
            None,
            Rc::new(move |_s: &mut Session, m: &EventMessage| {
                if let EventMessage::Msdp { value, .. } = m {
                    seen.borrow_mut().push((event.to_string(), value.to_string()));
                }
                Ok(())
            }),
        );
    }

    let mut bytes = vec![0xFF, 0xFA, 0x45, 0x01];
    bytes.extend_from_slice(b"HEALTH");
    bytes.push(0x02);
    bytes.extend_from_slice(b"85");
    bytes.extend_from_slice(&[0xFF, 0xF0]);
    session.feed(&bytes);

    assert_eq!(session.variables.state().health, 85);
    assert_eq!(
        *seen.borrow(),
        vec![
            ("msdp".to_string(), "85".to_string()),
            ("msdp.HEALTH".to_string(), "85".to_string()),
        ]
    );
}

#[test]
fn test_speedwalk() {
    let (mut session, screen, mut rx) = session();
    session.input("3nw");
    assert_eq!(
        chunks(&mut rx),
        vec![b"n\n".to_vec(), b"n\n".to_vec(), b"n\n".to_vec(), b"w\n".to_vec()]
    );
    let echoed: Vec<String> = screen
        .drain()
        .into_iter()
        .filter(|l| l.style == Style::Echo)
        .map(|l| l.text)
        .collect();
    assert_eq!(
        echoed,
        vec![
            "\x1b[33mn\x1b[0m",
            "\x1b[33mn\x1b[0m",
            "\x1b[33mn\x1b[0m",
            "\x1b[33mw\x1b[0m",
        ]
    );
}

#[test]
fn test_alias_expansion() {
    let (mut session, _screen, mut rx) = session();
    session.aliases.add("combat.k", "kill %1;smile %1", true).unwrap();
    session.input("k orc");
    assert_eq!(chunks(&mut rx), vec![b"kill orc\n".to_vec(), b"smile orc\n".to_vec()]);
}

#[test]
fn test_task_queue_chain() {
    let inserted: Rc<RefCell<Vec<String>>> = Rc::default();
    let sink = Rc::clone(&inserted);
    let mut queue = TaskQueueEngine::new();
    queue.set_inserter(Box::new(move |task: &Task| sink.borrow_mut().push(task.command.clone())));
    queue.set_queue("move", 0, None);

    let t0 = Instant::now();
    let half = Duration::from_millis(500);
    queue.add_chain(
        vec![
            Task::new("open door north").queue("move").duration(half),
            Task::new("north").queue("move").duration(half),
        ],
        t0,
    );
    assert_eq!(*inserted.borrow(), vec!["open door north"]);

    assert_eq!(queue.run(t0 + half).unwrap(), 1);
    assert_eq!(*inserted.borrow(), vec!["open door north", "north"]);
    assert_eq!(queue.run(t0 + half).unwrap(), 0);
}

#[test]
fn test_path_find() {
    let mut atlas = Atlas::in_memory();
    for vnum in ["3001", "3002", "3003"] {
        atlas.visit(vnum, "", "Midgaard", "", &BTreeMap::new()).unwrap();
    }
    atlas.set_exit(Exit::new("3001", "north", "3002").weight(1)).unwrap();
    atlas.set_exit(Exit::new("3002", "east", "3003").weight(1)).unwrap();

    let route = atlas.get_path("3001", "3003", &TravelerState::default(), &PathOptions::default());
    assert_eq!(route.len(), 2);
    assert_eq!(route.total_cost, 2);
    assert_eq!(route.simplified(), "n;e");
}
