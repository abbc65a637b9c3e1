use super::{format_bytes, format_nanos};
use crate::costmodel::{CostComparison, CostSample};
use crate::error::Result;
use comfy_table::{CellAlignment, Table};

pub fn run(n: usize, json: bool) -> Result<()> {
    let comparison = CostComparison::measure(n);
    tracing::debug!(n, ratio = comparison.copy_ratio(), "cost model measured");

    if json {
        println!("{}", serde_json::to_string_pretty(&comparison)?);
        return Ok(());
    }

    println!("# Items: {}", comparison.n);
    println!();

    let mut table = Table::new();
    table.set_header(vec!["GROWTH", "ALLOCATIONS", "BYTES COPIED", "OUTPUT", "ELAPSED"]);
    for sample in [&comparison.naive, &comparison.amortized] {
        table.add_row(row(sample));
    }
    for index in 1..5 {
        if let Some(column) = table.column_mut(index) {
            column.set_cell_alignment(CellAlignment::Right);
        }
    }
    println!("{table}");
    println!();
    println!("Naive growth copied {:.1}x more bytes", comparison.copy_ratio());
    Ok(())
}

fn row(sample: &CostSample) -> Vec<String> {
    vec![
        format!("{:?}", sample.growth).to_lowercase(),
        sample.allocations.to_string(),
        format_bytes(sample.bytes_copied),
        format_bytes(sample.output_len as u64),
        format_nanos(sample.elapsed.as_nanos() as u64),
    ]
}
