//! The declarative rule surface: what to rewrite, and how.
//!
//! A rule names a target method and an action:
//!
//! ```text
//! targetClass#targetMethod#descriptor[=>[innerClass#innerMethod#descriptor][->newOwnerClass]]
//! ```
//!
//! * no `=>` (or an empty right side): empty the target method's body
//! * `=>trace` / `=>trycatch` / `=>empty`: wrap or empty the whole body
//! * `=>a.b.C#m#(I)V`: delete matching calls inside the target method
//! * `=>a.b.C#m#(I)V->x.y.Z`: redirect matching calls to static dispatch on `x.y.Z`
//!
//! `*` (or the legacy `?`) in a signature field matches anything in that field.

pub mod matcher;
pub mod parser;

use std::collections::HashMap;
use std::fmt;

pub use parser::parse_rule;

/// Wildcard check; `?` is accepted for backwards compatibility with older
/// rule files.
pub fn is_wildcard(token: &str) -> bool {
    token == "*" || token == "?"
}

/// A method reference pattern as written in a rule, with the owning class in
/// both dotted and internal (slash) form. Fields holding the wildcard token
/// are kept verbatim; interpretation happens in [`matcher`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodSignature {
    pub class_dotted: String,
    pub class_internal: String,
    pub method_name: String,
    pub descriptor: String,
}

impl MethodSignature {
    pub fn new(class: &str, method_name: &str, descriptor: &str) -> Self {
        MethodSignature {
            class_dotted: class.replace('/', "."),
            class_internal: class.replace('.', "/"),
            method_name: method_name.to_string(),
            descriptor: descriptor.to_string(),
        }
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{}#{}",
            self.class_internal, self.method_name, self.descriptor
        )
    }
}

/// What to do to a matched method.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// Replace the whole body with a default-value return. Terminal: wins
    /// over every call-site action on the same method.
    EmptyBody,
    /// Bracket the body with trace-section begin/end calls.
    TraceBody,
    /// Wrap the body in a catch-all handler that logs and returns a default.
    TryCatchBody,
    /// Delete call instructions matching the signature.
    RemoveInvoke(MethodSignature),
    /// Redirect matching call instructions to a static method on `to_class`
    /// (internal form).
    ChangeInvoke {
        target: MethodSignature,
        to_class: String,
    },
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::EmptyBody => write!(f, "EmptyBody"),
            Action::TraceBody => write!(f, "TraceBody"),
            Action::TryCatchBody => write!(f, "TryCatchBody"),
            Action::RemoveInvoke(sig) => write!(f, "RemoveInvoke({sig})"),
            Action::ChangeInvoke { target, to_class } => {
                write!(f, "ChangeInvoke({target} -> {to_class})")
            }
        }
    }
}

/// One parsed rule: the method it targets and the action to apply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModifyConfig {
    pub target_method: MethodSignature,
    pub action: Action,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    BadRule { rule: String, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::BadRule { rule, reason } => {
                write!(f, "invalid modify rule {rule:?}: {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// All parsed rules, grouped `class -> method name -> configs` for O(1)
/// lookup while visiting classes. Read-only after construction, so one
/// `RuleSet` can serve any number of worker threads.
#[derive(Clone, Debug, Default)]
pub struct RuleSet {
    by_class: HashMap<String, HashMap<String, Vec<ModifyConfig>>>,
}

impl RuleSet {
    pub fn parse<I, S>(rules: I) -> Result<RuleSet, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut configs = Vec::new();
        for rule in rules {
            configs.push(parse_rule(rule.as_ref())?);
        }
        Ok(RuleSet::from_configs(configs))
    }

    pub fn from_configs(configs: Vec<ModifyConfig>) -> RuleSet {
        let mut by_class: HashMap<String, HashMap<String, Vec<ModifyConfig>>> = HashMap::new();
        for config in configs {
            // Wildcard method names group under one key, so lookups see a
            // single `*` bucket whichever wildcard the rule was written with.
            let method_key = if is_wildcard(&config.target_method.method_name) {
                "*".to_string()
            } else {
                config.target_method.method_name.clone()
            };
            by_class
                .entry(config.target_method.class_dotted.clone())
                .or_default()
                .entry(method_key)
                .or_default()
                .push(config);
        }
        RuleSet { by_class }
    }

    /// Rules for one class, keyed by method name. `class_name` may be dotted
    /// or slash-form.
    pub fn for_class(&self, class_name: &str) -> Option<&HashMap<String, Vec<ModifyConfig>>> {
        self.by_class.get(&class_name.replace('/', "."))
    }

    /// Dotted names of every class any rule targets.
    pub fn target_classes(&self) -> impl Iterator<Item = &str> {
        self.by_class.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.by_class.is_empty()
    }
}
