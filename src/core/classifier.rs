//! Detects whether a module source unit declares the extension entry point.
//!
//! Classification never executes the module: the source is tokenized and
//! searched for a global function definition of the entry point at the top
//! level of the chunk, so a module that is already loaded does not run its
//! top-level code a second time. Comments, string literals and nested blocks
//! (table constructors, function bodies, `if`/`do` blocks) never count.

use std::path::PathBuf;
use tracing::trace;

use crate::core::error::HotError;
use crate::core::resolver::{ModuleId, PathResolver};

/// A located module and the result of classifying it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleHandle {
    pub id: ModuleId,
    pub path: PathBuf,
    pub is_extension: bool,
}

#[derive(Debug, Clone)]
pub struct ExtensionClassifier {
    resolver: PathResolver,
    entry_point: String,
}

impl ExtensionClassifier {
    pub fn new(resolver: PathResolver, entry_point: &str) -> Self {
        Self {
            resolver,
            entry_point: entry_point.to_string(),
        }
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    /// Whether a chunk of source declares the entry point as a global function.
    pub fn declares_entry_point(&self, source: &str) -> bool {
        declares_global_function(source, &self.entry_point)
    }

    /// Locate the module's source unit and test it for the entry point.
    ///
    /// A module that cannot be located is a [`HotError::Resolution`]: the
    /// event came from a real file, so this indicates a race or a bug.
    /// Anything at the location that is not a regular file is not an extension.
    pub async fn classify(&self, module: &ModuleId) -> Result<ModuleHandle, HotError> {
        let path = self.resolver.locate(module);

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(HotError::Resolution {
                    module: module.clone(),
                    path,
                });
            }
            Err(e) => return Err(HotError::Io { path, source: e }),
        };

        let is_extension = if metadata.is_file() {
            let source = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| HotError::Io {
                    path: path.clone(),
                    source: e,
                })?;
            self.declares_entry_point(&source)
        } else {
            trace!("{:?} is not a regular file", path);
            false
        };
        trace!("🔍 Classified {} (extension: {})", module, is_extension);

        Ok(ModuleHandle {
            id: module.clone(),
            path,
            is_extension,
        })
    }
}

/// Lua token with literals reduced to a marker. Comments are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Name(&'a str),
    Symbol(&'a str),
    Literal,
}

struct Tokens<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Tokens<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    /// Level of a long bracket opening at the cursor: `[[` is 0, `[==[` is 2.
    fn long_bracket_level(&self) -> Option<usize> {
        let rest = &self.src.as_bytes()[self.pos..];
        if rest.first() != Some(&b'[') {
            return None;
        }
        let level = rest[1..].iter().take_while(|&&b| b == b'=').count();
        (rest.get(level + 1) == Some(&b'[')).then_some(level)
    }

    /// Skip a long bracket at the cursor. `None` when there is none.
    fn skip_long_bracket(&mut self) -> Option<()> {
        let level = self.long_bracket_level()?;
        let close = format!("]{}]", "=".repeat(level));
        let body = self.pos + level + 2;
        self.pos = match self.src[body..].find(&close) {
            Some(offset) => body + offset + close.len(),
            None => self.src.len(),
        };
        Some(())
    }

    fn skip_short_string(&mut self, quote: u8) {
        let src = self.src;
        let bytes = src.as_bytes();
        self.pos += 1;
        while let Some(&b) = bytes.get(self.pos) {
            self.pos += 1;
            match b {
                b'\\' => self.pos += 1,
                b'\n' => break,
                b if b == quote => break,
                _ => {}
            }
        }
        self.pos = self.pos.min(bytes.len());
    }

    fn skip_while(&mut self, pred: impl Fn(u8) -> bool) {
        let src = self.src;
        let bytes = src.as_bytes();
        while self.pos < bytes.len() && pred(bytes[self.pos]) {
            self.pos += 1;
        }
    }
}

impl<'a> Iterator for Tokens<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        let src = self.src;
        let bytes = src.as_bytes();
        loop {
            let b = *bytes.get(self.pos)?;
            let start = self.pos;

            match b {
                b if b.is_ascii_whitespace() => self.pos += 1,
                b'-' if bytes.get(start + 1) == Some(&b'-') => {
                    self.pos += 2;
                    if self.skip_long_bracket().is_none() {
                        self.skip_while(|b| b != b'\n');
                    }
                }
                b'"' | b'\'' => {
                    self.skip_short_string(b);
                    return Some(Token::Literal);
                }
                b'[' if self.long_bracket_level().is_some() => {
                    self.skip_long_bracket();
                    return Some(Token::Literal);
                }
                b if b.is_ascii_alphabetic() || b == b'_' => {
                    self.skip_while(|b| b.is_ascii_alphanumeric() || b == b'_');
                    return Some(Token::Name(&src[start..self.pos]));
                }
                b if b.is_ascii_digit() => {
                    self.skip_while(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'_');
                    return Some(Token::Literal);
                }
                b'.' => {
                    self.skip_while(|b| b == b'.');
                    return Some(Token::Symbol(&src[start..self.pos]));
                }
                b'=' | b'~' | b'<' | b'>' if bytes.get(start + 1) == Some(&b'=') => {
                    self.pos += 2;
                    return Some(Token::Symbol(&src[start..self.pos]));
                }
                b if b.is_ascii() => {
                    self.pos += 1;
                    return Some(Token::Symbol(&src[start..self.pos]));
                }
                // Non-ASCII outside literals is not valid Lua anyway
                _ => self.pos += 1,
            }
        }
    }
}

/// Whether the chunk assigns a function to the global `name` at its top level.
///
/// Recognizes `function name(` and `name = function`. A top-level
/// `local name` shadows the global for the rest of the chunk.
fn declares_global_function(source: &str, name: &str) -> bool {
    let tokens: Vec<Token<'_>> = Tokens::new(source).collect();
    let at = |i: usize| tokens.get(i).copied();

    let mut depth = 0usize;
    let mut shadowed = false;

    for (i, token) in tokens.iter().enumerate() {
        match *token {
            Token::Name("function") => {
                if depth == 0
                    && !shadowed
                    && at(i + 1) == Some(Token::Name(name))
                    && at(i + 2) == Some(Token::Symbol("("))
                {
                    return true;
                }
                depth += 1;
            }
            Token::Name("local") if depth == 0 => {
                let mut j = i + 1;
                if at(j) == Some(Token::Name("function")) {
                    j += 1;
                }
                while let Some(Token::Name(local)) = at(j) {
                    if local == name {
                        shadowed = true;
                    }
                    if at(j + 1) != Some(Token::Symbol(",")) {
                        break;
                    }
                    j += 2;
                }
            }
            Token::Name("do" | "if" | "repeat") => depth += 1,
            Token::Name("end" | "until") => depth = depth.saturating_sub(1),
            Token::Symbol("(" | "{" | "[") => depth += 1,
            Token::Symbol(")" | "}" | "]") => depth = depth.saturating_sub(1),
            Token::Name(n) if n == name && depth == 0 && !shadowed => {
                let qualified = matches!(
                    i.checked_sub(1).and_then(at),
                    Some(Token::Symbol("." | ":")) | Some(Token::Name("local"))
                );
                if !qualified
                    && at(i + 1) == Some(Token::Symbol("="))
                    && at(i + 2) == Some(Token::Name("function"))
                {
                    return true;
                }
            }
            _ => {}
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio::fs;

    fn classifier_at(base: &std::path::Path) -> ExtensionClassifier {
        ExtensionClassifier::new(PathResolver::new(base, ".lua"), "setup")
    }

    #[test]
    fn test_entry_point_declarations() {
        let c = classifier_at(std::path::Path::new("/tmp"));

        assert!(c.declares_entry_point("function setup(ctx)\nend\n"));
        assert!(c.declares_entry_point("local x = 1\n  function setup (ctx) end"));
        assert!(c.declares_entry_point("setup = function(ctx) end"));
        assert!(c.declares_entry_point("local t = { 1, 2 }\nfunction setup(ctx) end"));

        assert!(!c.declares_entry_point("local function setup(ctx) end"));
        assert!(!c.declares_entry_point("function setup_helper(ctx) end"));
        assert!(!c.declares_entry_point("-- function setup(ctx) end"));
        assert!(!c.declares_entry_point("return {}"));
    }

    #[test]
    fn test_table_fields_are_not_entry_points() {
        let c = classifier_at(std::path::Path::new("/tmp"));

        assert!(!c.declares_entry_point("return {\n  setup = function(opts) end,\n}\n"));
        assert!(!c.declares_entry_point("local M = {}\nM.setup = function() end\nreturn M"));
        assert!(!c.declares_entry_point("local M = {}\nfunction M.setup() end\nreturn M"));
        assert!(!c.declares_entry_point("function obj:setup() end"));
    }

    #[test]
    fn test_comments_and_strings_are_skipped() {
        let c = classifier_at(std::path::Path::new("/tmp"));

        assert!(!c.declares_entry_point("--[[\nfunction setup(ctx)\nend\n]]\nreturn {}"));
        assert!(!c.declares_entry_point("--[==[\nfunction setup(ctx) end\n]==]"));
        assert!(!c.declares_entry_point("local s = \"function setup(ctx) end\""));
        assert!(!c.declares_entry_point("local s = [[\nfunction setup(ctx) end\n]]"));
        assert!(c.declares_entry_point("--[[ old ]] function setup(ctx) end"));
        assert!(c.declares_entry_point("local s = 'it''s'\nfunction setup(ctx) end"));
    }

    #[test]
    fn test_nested_and_shadowed_definitions() {
        let c = classifier_at(std::path::Path::new("/tmp"));

        assert!(!c.declares_entry_point("if debug then\n  function setup(ctx) end\nend"));
        assert!(!c.declares_entry_point("local function f()\n  setup = function() end\nend"));
        assert!(!c.declares_entry_point("local a, setup\nsetup = function(ctx) end"));
        assert!(c.declares_entry_point("do local x = 1 end\nsetup = function(ctx) end"));
    }

    #[test]
    fn test_custom_entry_point() {
        let c = ExtensionClassifier::new(PathResolver::new("/tmp", ".lua"), "init");
        assert!(c.declares_entry_point("function init(ctx) end"));
        assert!(!c.declares_entry_point("function setup(ctx) end"));
    }

    #[tokio::test]
    async fn test_classify_existing_module() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src/cogs")).await.unwrap();
        fs::write(dir.path().join("src/cogs/ping.lua"), "function setup(ctx) end")
            .await
            .unwrap();
        fs::write(dir.path().join("src/cogs/util.lua"), "return { x = 1 }")
            .await
            .unwrap();

        let c = classifier_at(dir.path());

        let ping = c.classify(&ModuleId::from("src.cogs.ping")).await.unwrap();
        assert!(ping.is_extension);
        assert_eq!(ping.path, dir.path().join("src/cogs/ping.lua"));

        let util = c.classify(&ModuleId::from("src.cogs.util")).await.unwrap();
        assert!(!util.is_extension);
    }

    #[tokio::test]
    async fn test_classify_directory_is_not_an_extension() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src/cogs/vendored.lua"))
            .await
            .unwrap();

        let c = classifier_at(dir.path());
        let handle = c
            .classify(&ModuleId::from("src.cogs.vendored"))
            .await
            .unwrap();
        assert!(!handle.is_extension);
    }

    #[tokio::test]
    async fn test_classify_missing_module_is_resolution_error() {
        let dir = tempdir().unwrap();
        let c = classifier_at(dir.path());

        let err = c.classify(&ModuleId::from("src.cogs.gone")).await.unwrap_err();
        assert!(matches!(err, HotError::Resolution { .. }));
    }
}
