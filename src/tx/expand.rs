//! Grouping by operation/id-kind and nested-map expansion (spec §4.5).

use crate::error::{Error, Result};
use crate::schema::Schema;
use crate::value::AttrName;

use super::{AttrValueForm, FormValue, MapForm, TxEntity, TxForm};

/// A retraction form, attribute-level or whole-entity (spec §6 grammar).
#[derive(Debug, Clone)]
pub enum RetractionForm {
    Attr(TxEntity, AttrName, Option<FormValue>),
    Entity(TxEntity),
}

/// Transaction forms partitioned into the three categories the rest of the
/// pipeline walks in order (spec §4.4 step 2, §4.7): retractions, list-form
/// assertions, then map-form assertions. Order within each category is
/// preserved from the input.
pub struct Grouped {
    pub retractions: Vec<RetractionForm>,
    pub list_asserts: Vec<(TxEntity, AttrName, FormValue)>,
    pub map_asserts: Vec<MapForm>,
}

/// Splits raw forms into the three categories and expands every nested
/// entity map in a map-form assertion to a fixed point (spec §4.5). A
/// `FormValue::Nested` appearing in a list-form's value slot is rejected —
/// list forms name a single scalar/reference value, not a sub-entity (spec
/// §6 grammar: list form is a flat 4-tuple).
pub fn group_and_expand(forms: Vec<TxForm>, schema: &Schema) -> Result<Grouped> {
    let mut retractions = Vec::new();
    let mut list_asserts = Vec::new();
    let mut map_asserts_raw = Vec::new();

    for form in forms {
        match form {
            TxForm::Assert(_, a, FormValue::Nested(_)) => {
                return Err(Error::InvalidEntityId(format!(
                    "list-form assert on {a} cannot carry a nested entity map; use a map-form assertion"
                )));
            }
            TxForm::Assert(e, a, v) => list_asserts.push((e, a, v)),
            TxForm::Retract(_, a, Some(FormValue::Nested(_))) => {
                return Err(Error::InvalidEntityId(format!(
                    "list-form retract on {a} cannot carry a nested entity map"
                )));
            }
            TxForm::Retract(e, a, v) => retractions.push(RetractionForm::Attr(e, a, v)),
            TxForm::RetractEntity(e) => retractions.push(RetractionForm::Entity(e)),
            TxForm::AssertMap(m) => map_asserts_raw.push(m),
        }
    }

    let map_asserts = expand_nested_maps(map_asserts_raw, schema)?;

    Ok(Grouped {
        retractions,
        list_asserts,
        map_asserts,
    })
}

/// Breadth-first fixed-point expansion (spec §4.5): every `Nested` map value
/// under a reference attribute is lifted out into its own top-level
/// `MapForm`, linked back via a fresh tempid if it had no explicit id.
/// Cardinality-many reference values that are vectors are processed
/// element-wise. Every cardinality-many value is normalized to a set
/// (duplicates silently collapse when later converted to a `Value` set);
/// empty cardinality-many values are dropped entirely.
fn expand_nested_maps(roots: Vec<MapForm>, schema: &Schema) -> Result<Vec<MapForm>> {
    let mut queue: std::collections::VecDeque<MapForm> = roots.into_iter().collect();
    let mut out = Vec::new();
    let mut gensym = 0u64;

    while let Some(mut form) = queue.pop_front() {
        let mut new_attrs = Vec::with_capacity(form.attrs.len());
        for (attr, value_form) in std::mem::take(&mut form.attrs) {
            let is_component = schema.is_component(&attr);
            let is_reference = schema.is_reference(&attr);
            match value_form {
                AttrValueForm::One(FormValue::Nested(nested)) => {
                    let link = lift_nested(
                        *nested,
                        attr.clone(),
                        is_component,
                        schema,
                        &mut queue,
                        &mut gensym,
                    )?;
                    new_attrs.push((attr, AttrValueForm::One(FormValue::Ref(link))));
                }
                AttrValueForm::One(other) => {
                    new_attrs.push((attr, AttrValueForm::One(other)));
                }
                AttrValueForm::Many(items) => {
                    if !is_reference && items.iter().any(|v| matches!(v, FormValue::Nested(_))) {
                        return Err(Error::InvalidNestedEntity { attr: attr.clone() });
                    }
                    let mut lifted = Vec::with_capacity(items.len());
                    for item in items {
                        match item {
                            FormValue::Nested(nested) => {
                                let link = lift_nested(
                                    *nested,
                                    attr.clone(),
                                    is_component,
                                    schema,
                                    &mut queue,
                                    &mut gensym,
                                )?;
                                lifted.push(FormValue::Ref(link));
                            }
                            other => lifted.push(other),
                        }
                    }
                    if lifted.is_empty() {
                        // Normalizes to a set and drops empty cardinality-many values.
                        continue;
                    }
                    new_attrs.push((attr, AttrValueForm::Many(lifted)));
                }
            }
        }
        form.attrs = new_attrs;
        out.push(form);
    }

    Ok(out)
}

fn lift_nested(
    mut nested: MapForm,
    attr: AttrName,
    is_component: bool,
    schema: &Schema,
    queue: &mut std::collections::VecDeque<MapForm>,
    gensym: &mut u64,
) -> Result<TxEntity> {
    if !is_component && !nested.attrs.iter().any(|(a, _)| schema.is_unique_identity(a)) {
        return Err(Error::InvalidNestedEntity { attr });
    }
    let id = match nested.id.clone() {
        Some(id) => id,
        None => {
            *gensym += 1;
            let temp = TxEntity::TempId(format!("__nested_{gensym}").into());
            nested.id = Some(temp.clone());
            temp
        }
    };
    queue.push_back(nested);
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AttrSchema, Schema};
    use crate::value::Value;

    fn test_schema() -> Schema {
        Schema::build([
            (AttrName::new("person/license"), AttrSchema::default().component()),
            (
                AttrName::new("person/email"),
                AttrSchema::default().unique_identity(),
            ),
            (AttrName::new("person/best-friend"), AttrSchema::default().reference()),
        ])
        .unwrap()
    }

    #[test]
    fn component_nested_map_needs_no_unique_attr() {
        let schema = test_schema();
        let license = MapForm::new().set("license/number", Value::text("L1"));
        let person = MapForm::new()
            .with_id(TxEntity::temp("p"))
            .set("person/license", FormValue::Nested(Box::new(license)));
        let expanded = expand_nested_maps(vec![person], &schema).unwrap();
        assert_eq!(expanded.len(), 2);
    }

    #[test]
    fn non_component_nested_map_requires_unique_attr() {
        let schema = test_schema();
        let friend = MapForm::new().set("friend/name", Value::text("B"));
        let person = MapForm::new()
            .with_id(TxEntity::temp("p"))
            .set("person/best-friend", FormValue::Nested(Box::new(friend)));
        let err = expand_nested_maps(vec![person], &schema).unwrap_err();
        assert!(matches!(err, Error::InvalidNestedEntity { .. }));
    }
}
