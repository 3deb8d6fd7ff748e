//! Method-level bytecode surgery for [Java classfiles](https://docs.oracle.com/javase/specs/jvms/se10/html/jvms-4.html).
//!
//! Driven by a small rule DSL, the engine empties method bodies, deletes or
//! redirects call sites, and wraps bodies in catch-all handlers or trace
//! sections, operating directly on classfile bytes inside class directories
//! or jars.

use std::fmt;
use std::path::Path;

#[macro_use]
extern crate bitflags;

pub mod attribute_info;
pub mod constant_info;
pub mod field_info;
pub mod method_info;

pub mod code_attribute;

pub mod jar_utils;
pub mod rules;
pub mod surgery;
pub mod types;

pub use jar_utils::{JarError, JarFile};
pub use rules::{Action, ConfigError, MethodSignature, ModifyConfig, RuleSet};
pub use surgery::{Surgeon, SurgeryError};
pub use types::*;

#[derive(Debug)]
pub enum RewriteError {
    Jar(JarError),
    Surgery(SurgeryError),
}

impl fmt::Display for RewriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RewriteError::Jar(err) => write!(f, "{err}"),
            RewriteError::Surgery(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for RewriteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RewriteError::Jar(err) => Some(err),
            RewriteError::Surgery(err) => Some(err),
        }
    }
}

impl From<JarError> for RewriteError {
    fn from(err: JarError) -> Self {
        RewriteError::Jar(err)
    }
}

impl From<SurgeryError> for RewriteError {
    fn from(err: SurgeryError) -> Self {
        RewriteError::Surgery(err)
    }
}

/// Load a jar, rewrite every class the rules target and write the result.
/// Returns how many entries changed.
///
/// ```rust,no_run
/// let rules = classknife::RuleSet::parse(["com.app.Heavy#work#*=>trace"]).unwrap();
/// classknife::rewrite_jar_file(rules, "in.jar".as_ref(), "out.jar".as_ref()).unwrap();
/// ```
pub fn rewrite_jar_file(
    rules: RuleSet,
    input: &Path,
    output: &Path,
) -> Result<usize, RewriteError> {
    let surgeon = Surgeon::new(rules);
    let mut jar = JarFile::read_from(input)?;
    let rewritten = surgeon.rewrite_jar(&mut jar)?;
    jar.write_to(output)?;
    Ok(rewritten)
}
