//! Generic pre-order rewrite over the IR
//!
//! [`visit`] never mutates its input. For every node it hands the callback a
//! private copy; the callback either replaces the node outright (its subtree is
//! then left alone) or asks to descend. When descending, each child that the
//! callback and the `pre` hook left structurally unchanged is visited in turn
//! and the result is placed back into the copy. Children the callback already
//! altered are kept as-is.

use super::{Node, Operand, OutputStmt};

/// What the callback wants done with the current node
#[derive(Debug)]
pub enum Rewrite {
    /// Keep the (possibly edited) copy and visit its children
    Descend,
    /// Substitute this node; its children are not visited
    Replace(Node),
}

pub type Callback<'a, C> = &'a mut dyn FnMut(&mut Node, &mut C) -> Rewrite;
pub type Hook<'a, C> = &'a mut dyn FnMut(&mut Node, &mut C);

/// Rewrite `root` and return the new tree
///
/// `pre` runs after the callback and before children are visited; `post` runs
/// after. Both only run on the descending path.
pub fn visit<'a, C>(
    root: &Node,
    callback: Callback<'a, C>,
    ctx: &mut C,
    pre: Option<Hook<'a, C>>,
    post: Option<Hook<'a, C>>,
) -> Node {
    let mut traversal = Traversal {
        callback,
        pre,
        post,
    };
    traversal.run(root, ctx)
}

/// Visit with only a callback
pub fn rewrite<C>(root: &Node, callback: Callback<'_, C>, ctx: &mut C) -> Node {
    visit(root, callback, ctx, None, None)
}

struct Traversal<'a, C> {
    callback: Callback<'a, C>,
    pre: Option<Hook<'a, C>>,
    post: Option<Hook<'a, C>>,
}

impl<'a, C> Traversal<'a, C> {
    fn run(&mut self, node: &Node, ctx: &mut C) -> Node {
        let mut copy = node.clone();
        if let Rewrite::Replace(replacement) = (self.callback)(&mut copy, ctx) {
            return replacement;
        }

        if let Some(pre) = &mut self.pre {
            pre(&mut copy, ctx);
        }
        self.children(&mut copy, node, ctx);
        if let Some(post) = &mut self.post {
            post(&mut copy, ctx);
        }
        copy
    }

    fn children(&mut self, copy: &mut Node, original: &Node, ctx: &mut C) {
        match (copy, original) {
            (Node::Program(p), Node::Program(o)) => {
                self.list(&mut p.inputs, &o.inputs, ctx, Node::InputStmt, |n| match n {
                    Node::InputStmt(s) => Some(s),
                    _ => None,
                });
                self.slot(&mut p.output, &o.output, ctx, Node::OutputStmt, |n| match n {
                    Node::OutputStmt(s) => Some(s),
                    _ => None,
                });
            }
            (Node::OutputStmt(s), Node::OutputStmt(o)) => self.output(s, o, ctx),
            (Node::Let(l), Node::Let(o)) => self.node_slot(&mut l.expr, &o.expr, ctx),
            (Node::Binary(b), Node::Binary(o)) => {
                self.list(&mut b.operands, &o.operands, ctx, |n| n, Some);
            }
            (Node::Unary(u), Node::Unary(o)) => self.node_slot(&mut u.operand, &o.operand, ctx),
            (Node::Operand(op), Node::Operand(o)) => {
                self.slot(op, o, ctx, |o| o.to_node(), |n| Some(Operand::from_node(n)));
            }
            (Node::Call(c), Node::Call(o)) => {
                self.list(&mut c.args, &o.args, ctx, |n| n, Some);
            }
            // Leaves, or a node whose variant the callback swapped
            _ => {}
        }
    }

    fn output(&mut self, s: &mut OutputStmt, o: &OutputStmt, ctx: &mut C) {
        self.slot(&mut s.target, &o.target, ctx, Node::Ref, |n| match n {
            Node::Ref(r) => Some(r),
            Node::Operand(Operand::Ref(r)) => Some(r),
            _ => None,
        });
        self.list(&mut s.lets, &o.lets, ctx, Node::Let, |n| match n {
            Node::Let(l) => Some(l),
            _ => None,
        });
        self.node_slot(&mut s.expr, &o.expr, ctx);
    }

    fn node_slot(&mut self, slot: &mut Box<Node>, original: &Node, ctx: &mut C) {
        if slot.as_ref() == original {
            **slot = self.run(original, ctx);
        }
    }

    /// Visit a typed child; a replacement of the wrong shape is dropped
    fn slot<T: Clone + PartialEq>(
        &mut self,
        slot: &mut T,
        original: &T,
        ctx: &mut C,
        wrap: impl Fn(T) -> Node,
        unwrap: impl Fn(Node) -> Option<T>,
    ) {
        if slot != original {
            return;
        }
        let visited = self.run(&wrap(original.clone()), ctx);
        match unwrap(visited) {
            Some(value) => *slot = value,
            None => log::warn!("rewrite produced a node that does not fit its slot; keeping the original"),
        }
    }

    fn list<T: Clone + PartialEq>(
        &mut self,
        items: &mut [T],
        originals: &[T],
        ctx: &mut C,
        wrap: impl Fn(T) -> Node,
        unwrap: impl Fn(Node) -> Option<T>,
    ) {
        for (item, original) in items.iter_mut().zip(originals) {
            self.slot(item, original, ctx, &wrap, &unwrap);
        }
    }
}
