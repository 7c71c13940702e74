use tracing::trace;

use super::Params;
use crate::template::{Placeholder, PlaceholderKey, Template, TemplateNode};

/// One retained piece of the template, in output order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Segment<'t> {
    Literal(&'t str),
    Placeholder(&'t Placeholder),
}

/// The pruned, flattened template for one parameter set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation<'t> {
    pub segments: Vec<Segment<'t>>,
    pub included_blocks: usize,
    pub elided_blocks: usize,
}

/// Decide which optional blocks survive and flatten what remains.
///
/// A block is kept when every named placeholder directly inside it is bound
/// (a bound `NULL` counts). Nested blocks are decided only once their parent is kept.
#[must_use]
pub fn evaluate<'t>(template: &'t Template, params: &Params) -> Evaluation<'t> {
    let mut evaluation = Evaluation::default();
    walk(template.nodes(), params, &mut evaluation);
    trace!(
        included = evaluation.included_blocks,
        elided = evaluation.elided_blocks,
        "evaluated template blocks"
    );
    evaluation
}

fn walk<'t>(nodes: &'t [TemplateNode], params: &Params, out: &mut Evaluation<'t>) {
    for node in nodes {
        match node {
            TemplateNode::Literal(text) => out.segments.push(Segment::Literal(text)),
            TemplateNode::Placeholder(placeholder) => {
                out.segments.push(Segment::Placeholder(placeholder));
            }
            TemplateNode::Block(children) => {
                if block_is_bound(children, params) {
                    out.included_blocks += 1;
                    walk(children, params, out);
                } else {
                    out.elided_blocks += 1;
                }
            }
        }
    }
}

fn block_is_bound(children: &[TemplateNode], params: &Params) -> bool {
    children.iter().all(|child| match child {
        TemplateNode::Placeholder(Placeholder {
            key: PlaceholderKey::Named(name),
            ..
        }) => params.contains(name),
        _ => true,
    })
}
