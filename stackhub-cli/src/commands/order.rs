//! `hub order` command

use anyhow::Result;
use stackhub_core::{DependencyResolver, ManifestParser, Warnings};
use std::path::Path;
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
struct OrderRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "COMPONENT")]
    name: String,
    #[tabled(rename = "REQUIRES")]
    requires: String,
    #[tabled(rename = "PROVIDES")]
    provides: String,
}

/// Print the resolved execution order.
pub fn order(manifest: &Path, warnings: &Warnings) -> Result<()> {
    let stack = ManifestParser::parse_file(manifest)?;
    let order = DependencyResolver::resolve(&stack, warnings)?;

    let rows: Vec<OrderRow> = order
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let component = stack.component(name);
            OrderRow {
                index: i + 1,
                name: name.clone(),
                requires: component.map(|c| c.requires.join(", ")).unwrap_or_default(),
                provides: component.map(|c| c.provides.join(", ")).unwrap_or_default(),
            }
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::modern());
    println!("{}", table);
    Ok(())
}
