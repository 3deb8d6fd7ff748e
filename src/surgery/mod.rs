//! The rewriting engine: applies a [`RuleSet`] to whole classes.
//!
//! Per class, the driver walks the methods, selects the actions the rules
//! request for each, runs the rewriting passes over the planned layout and
//! re-encodes the `Code` attribute. Methods without code (abstract, native)
//! and classes no rule targets are left byte-identical.

pub mod default_value;
pub mod layout;
pub mod rewriters;
pub mod size;

use std::collections::HashMap;
use std::fmt;

use log::{debug, warn};

use crate::attribute_info::{AttributeError, AttributeInfo, CodeAttribute, StackMapTableAttribute};
use crate::code_attribute::encode_instructions;
use crate::rules::{is_wildcard, Action, MethodSignature, ModifyConfig, RuleSet};
use crate::types::ClassFile;

use default_value::{emit_default_return, return_kind};
use layout::{decode_units, relayout, RelayoutInput, SyntheticHandler};
use rewriters::{
    apply_change_invoke, apply_empty_init, apply_remove_invoke, apply_trace, apply_try_catch,
    MethodContext,
};
use size::{required_locals, SyntheticOp};

/// Nested `Code` attributes whose offsets go stale after any rewrite.
const STALE_CODE_ATTRIBUTES: [&str; 4] = [
    "LineNumberTable",
    "LocalVariableTable",
    "LocalVariableTypeTable",
    "StackMapTable",
];

#[derive(Debug)]
pub enum SurgeryError {
    /// Classfile or instruction stream failed to decode or encode.
    Codec(binrw::Error),
    Attribute(AttributeError),
    BadDescriptor { descriptor: String },
    UnsupportedReturnType { descriptor: String },
    /// A rewritten 16-bit branch no longer reaches its target.
    BranchOutOfRange { method: String },
    /// Rewritten code array exceeds the 65535-byte method limit.
    MethodTooLarge { method: String },
}

impl fmt::Display for SurgeryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SurgeryError::Codec(err) => write!(f, "classfile codec error: {err}"),
            SurgeryError::Attribute(err) => write!(f, "{err}"),
            SurgeryError::BadDescriptor { descriptor } => {
                write!(f, "malformed method descriptor {descriptor:?}")
            }
            SurgeryError::UnsupportedReturnType { descriptor } => {
                write!(f, "no default value for return type of {descriptor:?}")
            }
            SurgeryError::BranchOutOfRange { method } => {
                write!(f, "rewritten branch out of 16-bit range in {method}")
            }
            SurgeryError::MethodTooLarge { method } => {
                write!(f, "rewritten code exceeds method size limit in {method}")
            }
        }
    }
}

impl std::error::Error for SurgeryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SurgeryError::Codec(err) => Some(err),
            SurgeryError::Attribute(err) => Some(err),
            _ => None,
        }
    }
}

impl From<binrw::Error> for SurgeryError {
    fn from(err: binrw::Error) -> Self {
        SurgeryError::Codec(err)
    }
}

impl From<AttributeError> for SurgeryError {
    fn from(err: AttributeError) -> Self {
        SurgeryError::Attribute(err)
    }
}

/// Applies one rule set to any number of classes. Holds no per-class state,
/// so one instance is freely shared across threads.
pub struct Surgeon {
    rules: RuleSet,
}

impl Surgeon {
    pub fn new(rules: RuleSet) -> Surgeon {
        Surgeon { rules }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Rewrite one class. `class_name` may be dotted or slash-form. Returns
    /// `None` when no rule targets the class or nothing matched, so callers
    /// can keep the original bytes untouched.
    pub fn rewrite_class(
        &self,
        class_name: &str,
        bytes: &[u8],
    ) -> Result<Option<Vec<u8>>, SurgeryError> {
        let Some(method_rules) = self.rules.for_class(class_name) else {
            return Ok(None);
        };
        rewrite_class(bytes, method_rules)
    }
}

/// Rewrite a class against pre-selected per-method rules.
pub fn rewrite_class(
    bytes: &[u8],
    method_rules: &HashMap<String, Vec<ModifyConfig>>,
) -> Result<Option<Vec<u8>>, SurgeryError> {
    let mut class = ClassFile::from_bytes(bytes)?;
    let class_name = class
        .this_class_name()
        .map(|name| name.into_owned())
        .unwrap_or_default();
    debug!("rewriting class {class_name}");

    let mut changed = false;
    for method_index in 0..class.methods.len() {
        let method = &class.methods[method_index];
        if method.is_ignored() {
            continue;
        }
        let Some(name) = class.get_utf8(method.name_index) else {
            continue;
        };
        let name = name.into_owned();
        let Some(descriptor) = class.get_utf8(method.descriptor_index) else {
            continue;
        };
        let descriptor = descriptor.into_owned();

        let actions = select_actions(method_rules, &name, &descriptor);
        if actions.is_empty() {
            continue;
        }

        let Some(code_index) = method.attributes.iter().position(|attribute| {
            matches!(
                class.get_utf8(attribute.attribute_name_index).as_deref(),
                Some("Code")
            )
        }) else {
            continue;
        };

        let ctx = MethodContext {
            class_name: class_name.clone(),
            method_name: name,
            descriptor,
            is_static: class.methods[method_index].is_static(),
            max_locals: 0,
        };
        changed |= rewrite_method(&mut class, method_index, code_index, ctx, &actions)?;
    }

    if changed {
        debug!("class {class_name} rewritten");
        Ok(Some(class.to_bytes()?))
    } else {
        debug!("class {class_name} unchanged");
        Ok(None)
    }
}

/// Wildcard-keyed rules apply to every method with no descriptor check;
/// name-keyed rules additionally need a descriptor match or wildcard.
fn select_actions(
    method_rules: &HashMap<String, Vec<ModifyConfig>>,
    name: &str,
    descriptor: &str,
) -> Vec<Action> {
    let mut actions = Vec::new();
    if let Some(configs) = method_rules.get("*") {
        actions.extend(configs.iter().map(|config| config.action.clone()));
    }
    if let Some(configs) = method_rules.get(name) {
        for config in configs {
            if is_wildcard(&config.target_method.descriptor)
                || config.target_method.descriptor == descriptor
            {
                actions.push(config.action.clone());
            }
        }
    }
    actions
}

fn rewrite_method(
    class: &mut ClassFile,
    method_index: usize,
    code_index: usize,
    mut ctx: MethodContext,
    actions: &[Action],
) -> Result<bool, SurgeryError> {
    let info = class.methods[method_index].attributes[code_index].info.clone();
    let mut code_attr = CodeAttribute::parse(&info)?;
    ctx.max_locals = code_attr.max_locals;

    if actions.iter().any(|a| matches!(a, Action::EmptyBody)) {
        if actions.len() > 1 {
            warn!(
                "EmptyBody supersedes {} other action(s) on {}",
                actions.len() - 1,
                ctx.qualified_name()
            );
        }
        return empty_body(class, method_index, code_index, &ctx, code_attr);
    }

    let remove_targets: Vec<&MethodSignature> = actions
        .iter()
        .filter_map(|action| match action {
            Action::RemoveInvoke(signature) => Some(signature),
            _ => None,
        })
        .collect();
    let change_targets: Vec<(&MethodSignature, &str)> = actions
        .iter()
        .filter_map(|action| match action {
            Action::ChangeInvoke { target, to_class } => Some((target, to_class.as_str())),
            _ => None,
        })
        .collect();
    let wants_try_catch = actions.iter().any(|a| matches!(a, Action::TryCatchBody));
    let wants_trace = actions.iter().any(|a| matches!(a, Action::TraceBody));

    let mut units = decode_units(&code_attr.code)?;
    let mut changed = false;
    if !remove_targets.is_empty() {
        changed |= apply_remove_invoke(class, &ctx, &mut units, &remove_targets)?;
    }
    if !change_targets.is_empty() {
        changed |= apply_change_invoke(class, &ctx, &mut units, &change_targets)?;
    }

    let mut synthetic_handler: Option<SyntheticHandler> = None;
    let mut stack_growth: u16 = 0;
    let mut locals_growth: u16 = 0;
    if wants_try_catch {
        synthetic_handler = Some(apply_try_catch(class, &ctx, &mut units)?);
        let default_depth = return_kind(&ctx.descriptor)?.stack_slots();
        stack_growth += SyntheticOp::PrintStackTrace.stack_delta().max(default_depth);
        locals_growth += SyntheticOp::PrintStackTrace.locals_delta();
        changed = true;
    }
    if wants_trace {
        apply_trace(class, &ctx, &mut units)?;
        stack_growth += SyntheticOp::TraceBegin.stack_delta();
        changed = true;
    }

    if !changed {
        return Ok(false);
    }

    let stack_map = parsed_stack_map(class, &code_attr)?;
    let out = relayout(
        &units,
        RelayoutInput {
            exception_table: &code_attr.exception_table,
            stack_map: stack_map.as_ref(),
            synthetic_handler,
        },
        &ctx.qualified_name(),
    )?;

    code_attr.code = out.code;
    code_attr.exception_table = out.exception_table;
    code_attr.max_stack += stack_growth;
    code_attr.max_locals += locals_growth;
    store_code(class, method_index, code_index, code_attr, out.stack_map);
    Ok(true)
}

/// Replace the body with a default-value return; constructors and class
/// initializers keep their superclass call and singleton stores.
fn empty_body(
    class: &mut ClassFile,
    method_index: usize,
    code_index: usize,
    ctx: &MethodContext,
    mut code_attr: CodeAttribute,
) -> Result<bool, SurgeryError> {
    if ctx.method_name.starts_with('<') {
        let mut units = decode_units(&code_attr.code)?;
        if !apply_empty_init(class, ctx, &mut units) {
            return Ok(false);
        }
        let stack_map = parsed_stack_map(class, &code_attr)?;
        let out = relayout(
            &units,
            RelayoutInput {
                exception_table: &code_attr.exception_table,
                stack_map: stack_map.as_ref(),
                synthetic_handler: None,
            },
            &ctx.qualified_name(),
        )?;
        code_attr.code = out.code;
        code_attr.exception_table = out.exception_table;
        store_code(class, method_index, code_index, code_attr, out.stack_map);
        return Ok(true);
    }

    log::info!("empty body of {}", ctx.qualified_name());
    let (instructions, stack_depth) = emit_default_return(class, &ctx.descriptor)?;
    code_attr.code = encode_instructions(&instructions)?;
    code_attr.exception_table.clear();
    code_attr.max_stack = stack_depth;
    code_attr.max_locals = required_locals(ctx.is_static, &ctx.descriptor)?;
    store_code(class, method_index, code_index, code_attr, None);
    Ok(true)
}

fn parsed_stack_map(
    class: &ClassFile,
    code_attr: &CodeAttribute,
) -> Result<Option<StackMapTableAttribute>, SurgeryError> {
    for attribute in &code_attr.attributes {
        if matches!(
            class.get_utf8(attribute.attribute_name_index).as_deref(),
            Some("StackMapTable")
        ) {
            return Ok(Some(StackMapTableAttribute::parse(&attribute.info)?));
        }
    }
    Ok(None)
}

/// Drop nested attributes invalidated by the rewrite, attach the remapped
/// stack map and write the re-encoded `Code` attribute back in place.
fn store_code(
    class: &mut ClassFile,
    method_index: usize,
    code_index: usize,
    mut code_attr: CodeAttribute,
    stack_map: Option<StackMapTableAttribute>,
) {
    let stale: Vec<u16> = code_attr
        .attributes
        .iter()
        .map(|attribute| attribute.attribute_name_index)
        .filter(|&index| {
            matches!(
                class.get_utf8(index).as_deref(),
                Some(name) if STALE_CODE_ATTRIBUTES.contains(&name)
            )
        })
        .collect();
    code_attr
        .attributes
        .retain(|attribute| !stale.contains(&attribute.attribute_name_index));

    if let Some(stack_map) = stack_map {
        let name_index = class.get_or_add_utf8("StackMapTable");
        code_attr
            .attributes
            .push(AttributeInfo::new(name_index, stack_map.encode()));
    }

    let slot = &mut class.methods[method_index].attributes[code_index];
    *slot = AttributeInfo::new(slot.attribute_name_index, code_attr.encode());
}
