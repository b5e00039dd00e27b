use crate::catalog::list_nodes;

pub fn execute() -> anyhow::Result<()> {
    let nodes = list_nodes();
    let width = nodes.iter().map(|n| n.class.len()).max().unwrap_or(0);
    let mut category = "";
    for node in &nodes {
        if node.category != category {
            category = &node.category;
            println!("\n{category}");
        }
        println!("  {:<width$}  {}", node.class, node.display_name);
    }
    println!("\n{} node classes", nodes.len());
    Ok(())
}
