use super::evaluate::{Evaluation, Segment};
use super::style::{BindOptions, EmptyListPolicy};
use super::{Param, Params, QueryAndParams};
use crate::error::{BindingContext, BindingErrorKind, SqlWeaveError};
use crate::template::{Placeholder, PlaceholderKey, Template, TypeTag};
use crate::types::RowValues;

/// Turn an evaluated template into driver-ready SQL plus the ordered value list.
///
/// # Errors
/// - `Binding` for missing named keys, positional count mismatches, and failed casts
/// - `InvalidParameter` for empty lists (under `EmptyListPolicy::Reject`) and misused fragments
pub fn resolve(
    template: &Template,
    evaluation: &Evaluation<'_>,
    params: &Params,
    options: &BindOptions,
) -> Result<QueryAndParams, SqlWeaveError> {
    let mut resolver = Resolver {
        template: template.source(),
        options,
        query: String::with_capacity(template.source().len() + 16),
        values: Vec::new(),
    };

    let supplied = params.positional().len();
    let mut queue = params.positional().iter();
    let mut consumed = 0;

    for segment in &evaluation.segments {
        match segment {
            Segment::Literal(text) => resolver.query.push_str(text),
            Segment::Placeholder(placeholder) => {
                let (param, context) = match &placeholder.key {
                    PlaceholderKey::Named(name) => {
                        let context = BindingContext::Named(name.clone());
                        match params.get(name) {
                            Some(param) => (param, context),
                            None => {
                                return Err(resolver.binding(context, BindingErrorKind::Missing));
                            }
                        }
                    }
                    PlaceholderKey::Positional(_) => {
                        let slot = consumed;
                        consumed += 1;
                        let context = BindingContext::Positional(slot);
                        match queue.next() {
                            Some(param) => (param, context),
                            None => {
                                return Err(
                                    resolver.binding(context, BindingErrorKind::Shortfall)
                                );
                            }
                        }
                    }
                };
                resolver.emit(placeholder, param, context)?;
            }
        }
    }

    if consumed != supplied {
        return Err(resolver.binding(
            BindingContext::Count { consumed, supplied },
            BindingErrorKind::Surplus,
        ));
    }

    Ok(QueryAndParams {
        query: resolver.query,
        params: resolver.values,
    })
}

struct Resolver<'a> {
    template: &'a str,
    options: &'a BindOptions,
    query: String,
    values: Vec<RowValues>,
}

impl Resolver<'_> {
    fn emit(
        &mut self,
        placeholder: &Placeholder,
        param: &Param,
        context: BindingContext,
    ) -> Result<(), SqlWeaveError> {
        match param {
            Param::Fragment(fragment) => {
                if let Some(tag) = placeholder.tag {
                    return Err(self.invalid(
                        context,
                        format!("a clause fragment cannot carry type tag '!{}'", tag.letter()),
                    ));
                }
                self.query.push_str(fragment.as_sql());
            }
            Param::List(items) => {
                if items.is_empty() {
                    match self.options.empty_list {
                        EmptyListPolicy::Reject => {
                            return Err(self.invalid(context, "empty list"));
                        }
                        EmptyListPolicy::AlwaysFalse => self.query.push_str("NULL"),
                    }
                    return Ok(());
                }
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        self.query.push_str(", ");
                    }
                    let value = match placeholder.tag {
                        None | Some(TypeTag::List) => item.clone(),
                        Some(tag) => self.cast(tag, item.clone(), &context)?,
                    };
                    self.push_value(value);
                }
            }
            Param::Value(value) => {
                let value = match placeholder.tag {
                    None => value.clone(),
                    Some(TypeTag::List) => {
                        return Err(self.binding(
                            context,
                            BindingErrorKind::Cast(format!(
                                "expected a list, got {} value",
                                value.type_name()
                            )),
                        ));
                    }
                    Some(tag) => self.cast(tag, value.clone(), &context)?,
                };
                self.push_value(value);
            }
        }
        Ok(())
    }

    fn push_value(&mut self, value: RowValues) {
        self.values.push(value);
        self.options
            .style
            .write_marker(&mut self.query, self.values.len());
    }

    fn cast(
        &self,
        tag: TypeTag,
        value: RowValues,
        context: &BindingContext,
    ) -> Result<RowValues, SqlWeaveError> {
        tag.cast(value)
            .map_err(|message| self.binding(context.clone(), BindingErrorKind::Cast(message)))
    }

    fn binding(&self, context: BindingContext, kind: BindingErrorKind) -> SqlWeaveError {
        SqlWeaveError::Binding {
            template: self.template.to_string(),
            context,
            kind,
        }
    }

    fn invalid(&self, context: BindingContext, message: impl Into<String>) -> SqlWeaveError {
        SqlWeaveError::InvalidParameter {
            template: self.template.to_string(),
            context,
            message: message.into(),
        }
    }
}
