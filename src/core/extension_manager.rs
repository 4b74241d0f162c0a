use async_trait::async_trait;
use mlua::{Function, Lua, RegistryKey, Table};
use std::collections::HashMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::core::classifier::ExtensionClassifier;
use crate::core::error::HostError;
use crate::core::lifecycle::ExtensionHost;
use crate::core::resolver::{ModuleId, PathResolver};

/// Functions removed from the shared Lua state before any extension runs:
/// process control, shelling out, running other files by path and loading
/// native code. `require` keeps only the preload and Lua-source searchers.
const SANDBOX: &str = r#"
os.execute = nil
os.exit = nil
io.popen = nil
loadfile = nil
dofile = nil
package.loadlib = nil
package.cpath = ""
package.searchers = { package.searchers[1], package.searchers[2] }
"#;

/// Hook called, when defined, before an extension is dropped.
const TEARDOWN_HOOK: &str = "teardown";

struct LoadedExtension {
    path: PathBuf,
    /// Environment table the extension's chunk ran in.
    env: RegistryKey,
}

/// Lua extension host: owns the interpreter and the registry of loaded extensions.
///
/// Every extension runs in its own environment table that falls back to the
/// shared globals, so two extensions never see each other's top-level names.
/// The state is restricted, not isolated: extensions can still read files
/// with `io.open` and compile strings with `load`.
pub struct ExtensionManager {
    lua: Lua,
    resolver: PathResolver,
    entry_point: String,
    extensions: HashMap<ModuleId, LoadedExtension>,
}

impl ExtensionManager {
    pub fn new(resolver: PathResolver, entry_point: impl Into<String>) -> anyhow::Result<Self> {
        let lua = Lua::new();
        lua.load(SANDBOX)
            .set_name("sandbox")
            .exec()
            .map_err(|e| anyhow::anyhow!("Failed to prepare Lua sandbox: {}", e))?;

        Ok(Self {
            lua,
            resolver,
            entry_point: entry_point.into(),
            extensions: HashMap::new(),
        })
    }

    /// The shared interpreter, for hosts that expose their own API to extensions.
    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    pub fn is_loaded(&self, module: &ModuleId) -> bool {
        self.extensions.contains_key(module)
    }

    pub fn get_loaded_extensions(&self) -> Vec<ModuleId> {
        let mut loaded: Vec<_> = self.extensions.keys().cloned().collect();
        loaded.sort();
        loaded
    }

    pub fn get_extension_count(&self) -> usize {
        self.extensions.len()
    }

    /// Load every extension found directly inside `dir`.
    ///
    /// Files that are not extensions are skipped; failures are logged and do
    /// not stop the remaining loads. Returns how many extensions were loaded.
    pub async fn load_extensions_from(
        &mut self,
        dir: &Path,
        classifier: &ExtensionClassifier,
    ) -> anyhow::Result<usize> {
        let mut sources = Vec::new();
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read extensions directory {:?}: {}", dir, e))?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_file() && self.resolver.is_source(&path) {
                sources.push(path);
            }
        }
        sources.sort();

        info!("🔌 Found {} source files in {:?}", sources.len(), dir);

        let mut loaded = 0;
        for path in &sources {
            let module = self.resolver.resolve(path);
            match classifier.classify(&module).await {
                Ok(handle) if handle.is_extension => match self.load_extension(&module).await {
                    Ok(()) => {
                        info!("📦 Loaded extension: {}", module);
                        loaded += 1;
                    }
                    Err(e) => error!("❌ Failed to load extension '{}': {}", module, e),
                },
                Ok(_) => debug!("⏭️ Skipping {}, no '{}' entry point", module, self.entry_point),
                Err(e) => error!("❌ Failed to inspect '{}': {}", module, e),
            }
        }

        info!("✅ Loaded {} extensions successfully", loaded);
        Ok(loaded)
    }

    // Takes the located path rather than `&self`: `Lua` is not `Sync`, so a
    // `&self` borrow held across the await would make the host future `!Send`.
    async fn read_source(path: PathBuf, module: &ModuleId) -> Result<(PathBuf, String), HostError> {
        let source = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| load_failed(module, e))?;
        Ok((path, source))
    }

    fn activate(&mut self, module: &ModuleId, path: PathBuf, source: &str) -> Result<(), HostError> {
        if self.extensions.contains_key(module) {
            return Err(HostError::AlreadyLoaded(module.clone()));
        }

        let env = self.instantiate(module, &path, source)?;

        if let Err(e) = self.run_setup(module, &path, &env) {
            self.discard(env);
            return Err(e);
        }

        self.extensions
            .insert(module.clone(), LoadedExtension { path, env });
        Ok(())
    }

    fn reactivate(&mut self, module: &ModuleId, path: PathBuf, source: &str) -> Result<(), HostError> {
        let Some(old) = self.extensions.remove(module) else {
            return Err(HostError::NotLoaded(module.clone()));
        };

        // A chunk that fails to compile or run leaves the old instance in place
        let env = match self.instantiate(module, &path, source) {
            Ok(env) => env,
            Err(e) => {
                self.extensions.insert(module.clone(), old);
                return Err(e);
            }
        };

        self.run_teardown(module, &old);

        if let Err(e) = self.run_setup(module, &path, &env) {
            self.discard(env);
            warn!("⚠️ Reload of '{}' failed, restoring previous version", module);
            if let Err(restore) = self.run_setup(module, &old.path, &old.env) {
                error!("💥 Previous version of '{}' failed to restore: {}", module, restore);
            }
            self.extensions.insert(module.clone(), old);
            return Err(e);
        }

        self.discard(old.env);
        self.extensions
            .insert(module.clone(), LoadedExtension { path, env });
        Ok(())
    }

    fn deactivate(&mut self, module: &ModuleId) -> Result<(), HostError> {
        let Some(extension) = self.extensions.remove(module) else {
            return Err(HostError::NotLoaded(module.clone()));
        };

        self.run_teardown(module, &extension);
        self.discard(extension.env);
        Ok(())
    }

    /// Execute the module's chunk in a fresh environment.
    fn instantiate(
        &self,
        module: &ModuleId,
        path: &Path,
        source: &str,
    ) -> Result<RegistryKey, HostError> {
        let env = self.lua.create_table().map_err(|e| load_failed(module, e))?;
        let meta = self.lua.create_table().map_err(|e| load_failed(module, e))?;
        meta.set("__index", self.lua.globals())
            .map_err(|e| load_failed(module, e))?;
        env.set_metatable(Some(meta));

        self.lua
            .load(source)
            .set_name(format!("@{}", path.display()))
            .set_environment(env.clone())
            .exec()
            .map_err(|e| load_failed(module, e))?;

        self.lua
            .create_registry_value(env)
            .map_err(|e| load_failed(module, e))
    }

    fn run_setup(&self, module: &ModuleId, path: &Path, env: &RegistryKey) -> Result<(), HostError> {
        let called = self
            .call_hook(module, path, env, &self.entry_point)
            .map_err(|e| load_failed(module, e))?;

        if !called {
            return Err(load_failed(
                module,
                format!("no '{}' function defined", self.entry_point),
            ));
        }
        Ok(())
    }

    fn run_teardown(&self, module: &ModuleId, extension: &LoadedExtension) {
        match self.call_hook(module, &extension.path, &extension.env, TEARDOWN_HOOK) {
            Ok(true) => debug!("🧹 Tore down {}", module),
            Ok(false) => {}
            Err(e) => warn!("⚠️ Teardown of '{}' failed: {}", module, e),
        }
    }

    /// Call a function defined by the extension itself. Returns `false` when absent.
    fn call_hook(
        &self,
        module: &ModuleId,
        path: &Path,
        env: &RegistryKey,
        hook: &str,
    ) -> mlua::Result<bool> {
        let env: Table = self.lua.registry_value(env)?;
        let Some(function) = env.raw_get::<_, Option<Function>>(hook)? else {
            return Ok(false);
        };

        function.call::<_, ()>(self.context(module, path)?)?;
        Ok(true)
    }

    /// Table handed to `setup` and `teardown`: `{ name, path, log }`.
    fn context(&self, module: &ModuleId, path: &Path) -> mlua::Result<Table<'_>> {
        let ctx = self.lua.create_table()?;
        ctx.set("name", module.as_str())?;
        ctx.set("path", path.to_string_lossy().into_owned())?;

        let name = module.to_string();
        let log = self.lua.create_function(move |_, message: String| {
            info!("[{}] {}", name, message);
            Ok(())
        })?;
        ctx.set("log", log)?;

        Ok(ctx)
    }

    fn discard(&self, env: RegistryKey) {
        if let Err(e) = self.lua.remove_registry_value(env) {
            warn!("Failed to release extension environment: {}", e);
        }
    }
}

fn load_failed(module: &ModuleId, reason: impl Display) -> HostError {
    HostError::LoadFailed {
        module: module.clone(),
        reason: reason.to_string(),
    }
}

#[async_trait]
impl ExtensionHost for ExtensionManager {
    async fn load_extension(&mut self, module: &ModuleId) -> Result<(), HostError> {
        if self.is_loaded(module) {
            return Err(HostError::AlreadyLoaded(module.clone()));
        }
        let (path, source) = Self::read_source(self.resolver.locate(module), module).await?;
        self.activate(module, path, &source)
    }

    async fn reload_extension(&mut self, module: &ModuleId) -> Result<(), HostError> {
        if !self.is_loaded(module) {
            return Err(HostError::NotLoaded(module.clone()));
        }
        let (path, source) = Self::read_source(self.resolver.locate(module), module).await?;
        self.reactivate(module, path, &source)
    }

    async fn unload_extension(&mut self, module: &ModuleId) -> Result<(), HostError> {
        self.deactivate(module)
    }
}
