//! Tag-driven wiring of component fields and method parameters.

use std::sync::{Arc, Weak};

use tracing::{debug, trace};

use crate::component::{Component, Descriptor, FieldSpec};
use crate::context::ResolutionContext;
use crate::directive::{self, Directive, Site, Tag};
use crate::error::{BindingRef, MasnaError, NotRegisteredError, Result};
use crate::expr;
use crate::slot::{Instance, SlotInfo, SlotKind, Wired};

/// Produces the `self` handle of the object being built.
pub(crate) type SelfRef<'s> = Option<&'s (dyn Fn() -> Instance + 's)>;

fn check_kind(directive: &Directive, slot: &SlotInfo, site: Site<'_>) -> Result<()> {
    match (directive.is_reference(), slot.kind) {
        (true, SlotKind::Primitive) => Err(MasnaError::invalid(
            site.to_string(),
            format!(
                "{directive:?} needs a reference slot, found {}",
                slot.type_name
            ),
        )),
        (false, SlotKind::Reference) => Err(MasnaError::invalid(
            site.to_string(),
            format!("a value cannot fill reference slot {}", slot.type_name),
        )),
        _ => Ok(()),
    }
}

fn reference_key(slot: &SlotInfo, site: Site<'_>) -> Result<crate::key::DependencyKey> {
    slot.key.ok_or_else(|| {
        MasnaError::invalid(
            site.to_string(),
            format!("{} is not a reference slot", slot.type_name),
        )
    })
}

/// Resolves one directive for a slot.
pub(crate) fn resolve(
    ctx: &mut ResolutionContext<'_>,
    directive: &Directive,
    slot: &SlotInfo,
    self_ref: SelfRef<'_>,
    site: Site<'_>,
) -> Result<Wired> {
    check_kind(directive, slot, site)?;

    match directive {
        Directive::SelfRef => self_ref.map(|make| Wired::Handle(make())).ok_or_else(|| {
            MasnaError::invalid(site.to_string(), "`self` needs an object under construction")
        }),
        Directive::Auto(Some(name)) => {
            let key = reference_key(slot, site)?;
            ctx.resolve_name_or_type(name, key).map(Wired::Handle)
        }
        Directive::Auto(None) | Directive::Type => {
            let key = reference_key(slot, site)?;
            ctx.resolve_type(key).map(Wired::Handle)
        }
        Directive::Name(name) => {
            let key = reference_key(slot, site)?;
            ctx.resolve_name(name, Some(key)).map(Wired::Handle)
        }
        Directive::Value(text) => match directive::expression(text) {
            Some(code) => expr::evaluate(ctx, code).map(Wired::Value),
            None => Ok(Wired::Text(text.clone())),
        },
    }
}

/// Resolves method or factory arguments.
///
/// Without directives every parameter must be a reference and is resolved
/// by type; otherwise there must be exactly one directive per parameter.
pub(crate) fn resolve_params(
    ctx: &mut ResolutionContext<'_>,
    subject: &str,
    slots: &[SlotInfo],
    directives: &[String],
    self_ref: SelfRef<'_>,
) -> Result<Vec<Wired>> {
    if directives.is_empty() {
        return slots
            .iter()
            .map(|slot| match slot.kind {
                SlotKind::Reference => resolve(ctx, &Directive::Type, slot, self_ref, Site::Param),
                SlotKind::Primitive => Err(MasnaError::invalid(
                    subject,
                    format!(
                        "parameter of type {} cannot be resolved by type; give explicit parameters",
                        slot.type_name
                    ),
                )),
            })
            .collect();
    }

    if directives.len() != slots.len() {
        return Err(MasnaError::invalid(
            subject,
            format!(
                "{} parameters declared for {} arguments",
                directives.len(),
                slots.len()
            ),
        ));
    }

    slots
        .iter()
        .zip(directives)
        .map(|(slot, text)| {
            let directive = Directive::parse(text, Site::Param)?;
            resolve(ctx, &directive, slot, self_ref, Site::Param)
        })
        .collect()
}

/// Wires every tagged field of `target` in declaration order.
///
/// Errors carry the dotted path of the field that failed.
pub(crate) fn wire_fields<T: Component>(
    ctx: &mut ResolutionContext<'_>,
    target: &mut T,
    self_handle: Option<&Weak<T>>,
    descriptor: &Descriptor<T>,
) -> Result<()> {
    let owner = descriptor.short_name();
    let make_self = self_handle.map(|weak| move || Instance::weak(weak.clone()));
    let self_ref: SelfRef<'_> = make_self.as_ref().map(|make| make as &dyn Fn() -> Instance);

    for field in descriptor.fields() {
        wire_field(ctx, target, field, self_ref)
            .map_err(|err| err.at_field(format!("{owner}.{}", field.path())))?;
    }
    Ok(())
}

fn wire_field<T>(
    ctx: &mut ResolutionContext<'_>,
    target: &mut T,
    field: &FieldSpec<T>,
    self_ref: SelfRef<'_>,
) -> Result<()> {
    let site = Site::Field(field.name());
    let tag = match field.tags() {
        [] => return Ok(()),
        [tag] => tag,
        tags => {
            let kinds: Vec<&str> = tags.iter().map(Tag::kind).collect();
            return Err(MasnaError::invalid(
                site.to_string(),
                format!("conflicting tags: {}", kinds.join(", ")),
            ));
        }
    };
    let slot = field.slot();

    let wired = match tag {
        Tag::Wire(text) => {
            let directive = Directive::parse(text, site)?;
            if directive.is_reference() && !field.is_empty(target) {
                trace!(field = field.path(), "Field already set, skipping");
                return Ok(());
            }
            ctx.record(format!("wire {} ({directive:?})", field.path()));
            resolve(ctx, &directive, &slot, self_ref, site)?
        }
        Tag::Value(text) => {
            let directive = Directive::Value(text.clone());
            ctx.record(format!("value {}", field.path()));
            resolve(ctx, &directive, &slot, self_ref, site)?
        }
        Tag::New(params) => {
            if slot.kind == SlotKind::Primitive {
                return Err(MasnaError::invalid(
                    site.to_string(),
                    format!("`new` needs a reference slot, found {}", slot.type_name),
                ));
            }
            let key = reference_key(&slot, site)?;
            let factory = ctx.container().registry().lookup_factory(&key).ok_or_else(|| {
                MasnaError::NotRegistered(NotRegisteredError {
                    requested: BindingRef::Type(key),
                    suggestions: Vec::new(),
                })
            })?;
            ctx.record(format!("new {} via {}", field.path(), factory.kind()));
            Wired::Handle(factory.invoke(ctx, &directive::split_params(params), self_ref)?)
        }
    };

    field.assign(target, wired)
}

/// Wires the tagged fields of an existing object.
///
/// `self` directives fail here since the object is not owned by an `Arc`;
/// use [`auto_wire_shared`] for that.
pub fn auto_wire<T: Component>(ctx: &mut ResolutionContext<'_>, target: &mut T) -> Result<()> {
    let descriptor = Descriptor::<T>::get();
    debug!(component = %descriptor.short_name(), "Auto-wiring existing object");
    wire_fields(ctx, target, None, &descriptor)
}

/// Builds a `T` from `seed`, wires it with access to its own `Arc`, and
/// returns the shared handle.
pub fn auto_wire_shared<T: Component>(ctx: &mut ResolutionContext<'_>, seed: T) -> Result<Arc<T>> {
    let descriptor = Descriptor::<T>::get();
    debug!(component = %descriptor.short_name(), "Auto-wiring shared object");

    let mut failure = None;
    let built = Arc::new_cyclic(|weak: &Weak<T>| {
        let mut target = seed;
        if let Err(err) = wire_fields(ctx, &mut target, Some(weak), &descriptor) {
            failure = Some(err);
        }
        target
    });

    match failure {
        Some(err) => Err(err),
        None => Ok(built),
    }
}
