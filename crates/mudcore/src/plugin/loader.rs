//! 外掛載入器
//!
//! 兩個階段：先載入內建單元 `core`，再載入設定目錄下找到的 `*.plugin.json`。
//! 重新載入時只處理有變動（mtime 與內容指紋都變了）或上次載入出錯的單元。

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::SystemTime;

use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::{PluginCatalog, PluginContext, PluginError, PluginId};
use crate::session::Session;

/// 內建單元名稱
pub const CORE_UNIT: &str = "core";

/// 外掛單元檔副檔名
pub const UNIT_SUFFIX: &str = ".plugin.json";

/// 單元檔內容
#[derive(Debug, Default, Deserialize)]
struct UnitFile {
    #[serde(default)]
    plugins: Vec<String>,
    #[serde(default)]
    settings: HashMap<String, serde_json::Value>,
}

/// 一個單元的載入結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub unit: String,
    pub plugins: Vec<String>,
    pub errors: Vec<String>,
}

impl LoadReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// 已載入外掛資訊（列表用）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInfo {
    pub id: PluginId,
    pub unit: String,
}

struct UnitState {
    mtime: Option<SystemTime>,
    fingerprint: String,
    plugins: Vec<PluginId>,
    errors: Vec<String>,
}

struct Loaded {
    unit: String,
    object: Rc<dyn Any>,
}

pub struct PluginLoader {
    catalog: Rc<PluginCatalog>,
    core: Vec<String>,
    roots: Vec<PathBuf>,
    units: BTreeMap<String, UnitState>,
    loaded: BTreeMap<PluginId, Loaded>,
}

fn fingerprint(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn walk(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        debug!("外掛目錄不存在或無法讀取: {}", dir.display());
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            walk(&path, out);
        } else if path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(UNIT_SUFFIX))
        {
            out.push(path);
        }
    }
}

impl PluginLoader {
    pub fn new(catalog: Rc<PluginCatalog>, core: Vec<String>, roots: Vec<PathBuf>) -> Self {
        Self {
            catalog,
            core,
            roots,
            units: BTreeMap::new(),
            loaded: BTreeMap::new(),
        }
    }

    /// 遞迴找出所有單元檔（排序）
    pub fn discover(&self) -> Vec<PathBuf> {
        let mut found = Vec::new();
        for root in &self.roots {
            walk(root, &mut found);
        }
        found.sort();
        found
    }

    /// 兩階段載入全部單元
    pub fn load_all(&mut self, session: &mut Session) -> Vec<LoadReport> {
        let mut reports = vec![self.load_core(session)];
        for path in self.discover() {
            reports.push(self.load_file(session, &path));
        }
        reports
    }

    /// 重新載入有變動的單元；`only` 指定外掛名稱時強制重載它所在的單元
    pub fn reload(&mut self, session: &mut Session, only: Option<&str>) -> Vec<LoadReport> {
        let mut reports = Vec::new();
        let owns = |state: &UnitState| {
            only.is_some_and(|name| state.plugins.iter().any(|id| id.as_str() == name))
        };

        if self.units.get(CORE_UNIT).is_some_and(|s| owns(s) || !s.errors.is_empty()) {
            self.unload_unit(session, CORE_UNIT);
            reports.push(self.load_core(session));
        }

        let found = self.discover();
        let keys: Vec<String> = found.iter().map(|p| p.display().to_string()).collect();
        let vanished: Vec<String> = self
            .units
            .keys()
            .filter(|k| k.as_str() != CORE_UNIT && !keys.contains(k))
            .cloned()
            .collect();
        for key in vanished {
            info!("外掛單元已移除: {}", key);
            self.unload_unit(session, &key);
        }

        for (path, key) in found.iter().zip(keys) {
            let known = self.units.get(&key).map(|state| {
                (
                    owns(state) || !state.errors.is_empty(),
                    state.mtime,
                    state.fingerprint.clone(),
                )
            });
            let reload = match known {
                None | Some((true, _, _)) => true,
                Some((false, old_mtime, old_print)) => {
                    let mtime = modified(path);
                    if old_mtime == mtime {
                        false
                    } else {
                        let changed = fs::read(path)
                            .map(|bytes| fingerprint(&bytes) != old_print)
                            .unwrap_or(true);
                        if !changed {
                            debug!("單元 {} 只有時間戳變動，略過", key);
                            if let Some(state) = self.units.get_mut(&key) {
                                state.mtime = mtime;
                            }
                        }
                        changed
                    }
                }
            };
            if reload {
                self.unload_unit(session, &key);
                reports.push(self.load_file(session, path));
            }
        }
        reports
    }

    /// 卸載全部外掛
    pub fn unload_all(&mut self, session: &mut Session) {
        let keys: Vec<String> = self.units.keys().cloned().collect();
        for key in keys {
            self.unload_unit(session, &key);
        }
    }

    /// 目前每個單元的狀態
    pub fn reports(&self) -> Vec<LoadReport> {
        self.units
            .iter()
            .map(|(unit, state)| LoadReport {
                unit: unit.clone(),
                plugins: state.plugins.iter().map(|id| id.to_string()).collect(),
                errors: state.errors.clone(),
            })
            .collect()
    }

    pub fn plugins(&self) -> Vec<PluginInfo> {
        self.loaded
            .iter()
            .map(|(id, loaded)| PluginInfo {
                id: id.clone(),
                unit: loaded.unit.clone(),
            })
            .collect()
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.contains_key(&PluginId::new(name))
    }

    /// 取得外掛實例
    pub fn get<P: 'static>(&self, name: &str) -> Option<Rc<P>> {
        let loaded = self.loaded.get(&PluginId::new(name))?;
        Rc::clone(&loaded.object).downcast::<P>().ok()
    }

    fn load_core(&mut self, session: &mut Session) -> LoadReport {
        let names = self.core.clone();
        self.load_unit(
            session,
            CORE_UNIT.to_string(),
            names,
            HashMap::new(),
            Vec::new(),
            None,
            String::new(),
        )
    }

    fn load_file(&mut self, session: &mut Session, path: &Path) -> LoadReport {
        let key = path.display().to_string();
        let mtime = modified(path);
        let parsed = fs::read(path)
            .map_err(|e| PluginError::UnreadableUnit {
                path: key.clone(),
                reason: e.to_string(),
            })
            .and_then(|bytes| {
                let unit: UnitFile = serde_json::from_slice(&bytes)?;
                Ok((unit, fingerprint(&bytes)))
            });
        match parsed {
            Ok((unit, print)) => self.load_unit(
                session,
                key,
                unit.plugins,
                unit.settings,
                Vec::new(),
                mtime,
                print,
            ),
            Err(e) => {
                warn!("外掛單元 {} 無法載入: {}", key, e);
                self.load_unit(
                    session,
                    key,
                    Vec::new(),
                    HashMap::new(),
                    vec![e.to_string()],
                    mtime,
                    String::new(),
                )
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn load_unit(
        &mut self,
        session: &mut Session,
        key: String,
        names: Vec<String>,
        mut settings: HashMap<String, serde_json::Value>,
        mut errors: Vec<String>,
        mtime: Option<SystemTime>,
        fingerprint: String,
    ) -> LoadReport {
        let mut plugins = Vec::new();
        for name in names {
            let id = PluginId::new(name.as_str());
            if self.loaded.contains_key(&id) {
                errors.push(PluginError::DuplicateName(name).to_string());
                continue;
            }
            let ctx = PluginContext {
                session: session.name().to_string(),
                unit: key.clone(),
                settings: settings.remove(&name).unwrap_or(serde_json::Value::Null),
                atlas: Rc::clone(&session.atlas),
            };
            match self.catalog.instantiate(&name, &ctx, session) {
                Ok(instance) => {
                    self.loaded.insert(
                        instance.id.clone(),
                        Loaded {
                            unit: key.clone(),
                            object: instance.object,
                        },
                    );
                    plugins.push(instance.id);
                }
                Err(e) => {
                    warn!("外掛 {} 載入失敗: {}", name, e);
                    errors.push(e.to_string());
                }
            }
        }
        info!(
            "單元 {} 載入 {} 個外掛，{} 個錯誤",
            key,
            plugins.len(),
            errors.len()
        );
        let report = LoadReport {
            unit: key.clone(),
            plugins: plugins.iter().map(|id| id.to_string()).collect(),
            errors: errors.clone(),
        };
        self.units.insert(
            key,
            UnitState {
                mtime,
                fingerprint,
                plugins,
                errors,
            },
        );
        report
    }

    fn unload_unit(&mut self, session: &mut Session, key: &str) {
        let Some(state) = self.units.remove(key) else {
            return;
        };
        for id in state.plugins {
            session.unregister_owner(&id);
            self.loaded.remove(&id);
            debug!("卸載外掛 {}", id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    use crate::action::ActionDef;
    use crate::atlas::Atlas;
    use crate::command::CommandDef;
    use crate::config::SessionConfig;
    use crate::plugin::{Plugin, Registrar};
    use crate::screen::SharedScreen;

    struct Greeter {
        greeting: String,
        greeted: Cell<u32>,
    }

    #[derive(Default, Deserialize)]
    struct GreeterSettings {
        #[serde(default)]
        greeting: String,
    }

    impl Plugin for Greeter {
        const NAME: &'static str = "Greeter";

        fn create(ctx: &PluginContext) -> Result<Self, PluginError> {
            let settings: GreeterSettings = ctx.settings()?;
            Ok(Self {
                greeting: settings.greeting,
                greeted: Cell::new(0),
            })
        }

        fn register(reg: &mut Registrar<'_, Self>) {
            reg.action(ActionDef::new("greet", "^(\\w+) arrives"), |p, s, _line, _args| {
                p.greeted.set(p.greeted.get() + 1);
                s.echo(&p.greeting);
                Ok(())
            });
            reg.command(CommandDef::new("greet", ""), |p, s, _args| {
                s.echo(&p.greeting);
                Ok(())
            });
        }
    }

    struct Farewell;

    impl Plugin for Farewell {
        const NAME: &'static str = "Farewell";

        fn create(_ctx: &PluginContext) -> Result<Self, PluginError> {
            Ok(Self)
        }

        fn register(reg: &mut Registrar<'_, Self>) {
            reg.command(CommandDef::new("bye", ""), |_, s, _| {
                s.echo("bye");
                Ok(())
            });
        }
    }

    fn catalog() -> Rc<PluginCatalog> {
        let mut catalog = PluginCatalog::new();
        catalog.add::<Greeter>();
        catalog.add::<Farewell>();
        Rc::new(catalog)
    }

    fn session(root: &Path) -> (Session, SharedScreen) {
        let screen = SharedScreen::new(100);
        let mut config = SessionConfig::new("test");
        config.core_plugins = vec!["Farewell".to_string()];
        config.plugin_roots = vec![root.to_path_buf()];
        let session = Session::new(
            config,
            Atlas::in_memory().shared(),
            catalog(),
            Box::new(screen.clone()),
        )
        .unwrap();
        (session, screen)
    }

    fn write_unit(path: &Path, greeting: &str) {
        let body = serde_json::json!({
            "plugins": ["Greeter"],
            "settings": {"Greeter": {"greeting": greeting}},
        });
        fs::write(path, body.to_string()).unwrap();
    }

    #[test]
    fn test_two_phase_load() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        write_unit(&dir.path().join("nested/greet.plugin.json"), "hello");
        let (mut session, screen) = session(dir.path());

        let reports = session.plugin_reports();
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(LoadReport::is_ok));

        session.input("#greet");
        session.input("#bye");
        assert_eq!(screen.texts(), vec!["hello", "bye"]);
        let greeter = session.plugin::<Greeter>("Greeter").unwrap();
        session.showme("Bob arrives from the north.");
        assert_eq!(greeter.greeted.get(), 1);
    }

    #[test]
    fn test_broken_unit_does_not_block_others() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.plugin.json"), "{ not json").unwrap();
        fs::write(
            dir.path().join("b.plugin.json"),
            r#"{"plugins": ["Missing", "Greeter"]}"#,
        )
        .unwrap();
        let (session, _screen) = session(dir.path());
        let reports = session.plugin_reports();
        let broken = reports.iter().find(|r| r.unit.ends_with("a.plugin.json")).unwrap();
        assert_eq!(broken.errors.len(), 1);
        let partial = reports.iter().find(|r| r.unit.ends_with("b.plugin.json")).unwrap();
        assert_eq!(partial.plugins, vec!["Greeter"]);
        assert_eq!(partial.errors.len(), 1);
    }

    #[test]
    fn test_duplicate_name_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("dup.plugin.json"),
            r#"{"plugins": ["Farewell"]}"#,
        )
        .unwrap();
        let (session, _screen) = session(dir.path());
        let reports = session.plugin_reports();
        let dup = reports.iter().find(|r| r.unit.ends_with("dup.plugin.json")).unwrap();
        assert!(dup.plugins.is_empty());
        assert!(dup.errors[0].contains("Farewell"));
    }

    #[test]
    fn test_reload_changed_and_removed_units() {
        let dir = tempfile::tempdir().unwrap();
        let unit = dir.path().join("greet.plugin.json");
        write_unit(&unit, "hello");
        let (mut session, screen) = session(dir.path());

        assert!(session.reload_plugins(None).is_empty());

        write_unit(&unit, "howdy, partner");
        let bumped = SystemTime::now() + std::time::Duration::from_secs(5);
        fs::File::options()
            .write(true)
            .open(&unit)
            .unwrap()
            .set_modified(bumped)
            .unwrap();
        let reports = session.reload_plugins(None);
        assert_eq!(reports.len(), 1);
        session.input("#greet");
        assert_eq!(screen.texts().last().map(String::as_str), Some("howdy, partner"));

        fs::remove_file(&unit).unwrap();
        session.reload_plugins(None);
        assert!(session.plugin::<Greeter>("Greeter").is_none());
        assert!(session.commands.list().iter().all(|c| c.name != "greet"));
    }

    #[test]
    fn test_forced_reload_by_name() {
        let dir = tempfile::tempdir().unwrap();
        write_unit(&dir.path().join("greet.plugin.json"), "hello");
        let (mut session, _screen) = session(dir.path());
        let before = session.plugin::<Greeter>("Greeter").unwrap();
        let reports = session.reload_plugins(Some("Greeter"));
        assert_eq!(reports.len(), 1);
        let after = session.plugin::<Greeter>("Greeter").unwrap();
        assert!(!Rc::ptr_eq(&before, &after));
    }

    #[test]
    fn test_fingerprint_is_sha256_hex() {
        assert_eq!(
            fingerprint(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
