//! ASCII tree rendering for composition hierarchies.

use crate::models::OrganismTreeNode;

const OPEN_TRUNK: char = '○';
const GOVERNED: char = '●';
const STATELESS: char = '◇';

const SUMMARY_LIMIT: usize = 40;

fn node_symbol(node: &OrganismTreeNode) -> char {
    match (&node.current_state, node.organism.open_trunk) {
        (None, _) => STATELESS,
        (Some(_), true) => OPEN_TRUNK,
        (Some(_), false) => GOVERNED,
    }
}

/// `content-type: summary [short id]`
fn node_label(node: &OrganismTreeNode) -> String {
    let short_id: String = node.organism.id.to_string().chars().take(8).collect();
    let Some(state) = &node.current_state else {
        return format!("(no state) [{}]", short_id);
    };

    let summary = match state.payload.get("content").and_then(|c| c.as_str()) {
        Some(content) => content.to_string(),
        None => state.payload.to_string(),
    };
    let summary = if summary.chars().count() > SUMMARY_LIMIT {
        let cut: String = summary.chars().take(SUMMARY_LIMIT - 1).collect();
        format!("{}…", cut)
    } else {
        summary
    };

    format!("{}: {} [{}]", state.content_type_id, summary, short_id)
}

/// Render an organism tree as ASCII art with status symbols.
///
/// `○` open-trunk, `●` proposal-governed, `◇` no state yet.
///
/// Example output:
/// ```text
/// ● text: Handbook [1f0c2a9e]
/// ├── ● freeze-policy: {"frozen":false} [7b11c0d4]
/// └── ○ text: Onboarding [a3e95f12]
///     └── ○ text: First week [0c4d2b77]
/// ```
pub fn render_tree(root: &OrganismTreeNode) -> String {
    let mut output = String::new();
    output.push(node_symbol(root));
    output.push(' ');
    output.push_str(&node_label(root));
    output.push('\n');

    render_children(&mut output, root, "");
    output
}

fn render_children(output: &mut String, node: &OrganismTreeNode, prefix: &str) {
    for (i, child) in node.children.iter().enumerate() {
        let is_last = i == node.children.len() - 1;
        let branch = if is_last { "└── " } else { "├── " };
        output.push_str(prefix);
        output.push_str(branch);
        output.push(node_symbol(child));
        output.push(' ');
        output.push_str(&node_label(child));
        output.push('\n');

        let continuation = if is_last { "    " } else { "│   " };
        render_children(output, child, &format!("{}{}", prefix, continuation));
    }
}
