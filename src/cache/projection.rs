//! Nested comment projection.
//!
//! The flat comment collection of a post is the only thing cached; the reply
//! tree is derived from it on every read. Server order is kept within each
//! level. A comment whose parent is missing from the collection is an orphan:
//! it is left out of the tree together with everything below it, so a reply
//! is never shown under a parent that does not exist.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use uuid::Uuid;

use crate::domain::entities::Comment;

/// One comment and its replies.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommentNode {
    pub comment: Comment,
    pub replies: Vec<CommentNode>,
}

impl CommentNode {
    /// Replies at every depth below this comment.
    pub fn reply_count(&self) -> usize {
        self.replies
            .iter()
            .map(|reply| 1 + reply.reply_count())
            .sum()
    }

    pub fn depth(&self) -> usize {
        1 + self.replies.iter().map(CommentNode::depth).max().unwrap_or(0)
    }
}

/// Reply tree of one post.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommentThread {
    pub roots: Vec<CommentNode>,
    /// Comments left out because their ancestry does not resolve.
    pub orphaned: usize,
}

impl CommentThread {
    pub fn project(comments: &[Comment]) -> Self {
        let known: HashSet<Uuid> = comments.iter().map(|comment| comment.id).collect();
        let mut children: HashMap<Uuid, Vec<&Comment>> = HashMap::new();
        let mut roots: Vec<&Comment> = Vec::new();
        for comment in comments {
            match comment.parent_id {
                None => roots.push(comment),
                Some(parent) if known.contains(&parent) && parent != comment.id => {
                    children.entry(parent).or_default().push(comment);
                }
                Some(_) => {}
            }
        }

        let mut visited = HashSet::new();
        let roots: Vec<CommentNode> = roots
            .into_iter()
            .map(|root| build(root, &children, &mut visited))
            .collect();
        Self {
            orphaned: comments.len() - visited.len(),
            roots,
        }
    }

    /// Comments reachable from a top-level comment.
    pub fn total(&self) -> usize {
        self.roots.iter().map(|root| 1 + root.reply_count()).sum()
    }

    pub fn find(&self, id: Uuid) -> Option<&CommentNode> {
        fn search(nodes: &[CommentNode], id: Uuid) -> Option<&CommentNode> {
            nodes.iter().find_map(|node| {
                if node.comment.id == id {
                    Some(node)
                } else {
                    search(&node.replies, id)
                }
            })
        }
        search(&self.roots, id)
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

fn build(
    comment: &Comment,
    children: &HashMap<Uuid, Vec<&Comment>>,
    visited: &mut HashSet<Uuid>,
) -> CommentNode {
    visited.insert(comment.id);
    let mut replies = Vec::new();
    for reply in children.get(&comment.id).into_iter().flatten() {
        // Duplicate ids in corrupt data could loop; cut them.
        if !visited.contains(&reply.id) {
            replies.push(build(reply, children, visited));
        }
    }
    CommentNode {
        comment: comment.clone(),
        replies,
    }
}
