/// Find and Replace Example
///
/// This example demonstrates:
/// - Searching a table case-insensitively
/// - Stepping through matches and replacing one at a time
/// - Previewing and committing a replace-all

use dbf_commander::{CellValue, Column, ColumnType, FindEngine, FindOptions, Schema, Table};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== DBF Commander Find/Replace Example ===\n");

    let schema = Schema::try_new(vec![
        Column::with_width("STREET", ColumnType::Text, 30, 0),
        Column::with_width("CITY", ColumnType::Text, 15, 0),
    ])?;
    let mut table = Table::with_rows(
        "addresses",
        schema,
        vec![
            vec![CellValue::from("Rua Augusta 10"), CellValue::from("LISBOA")],
            vec![CellValue::from("Avenida da Boavista"), CellValue::from("Porto")],
            vec![CellValue::from("Rua do Ouro"), CellValue::from("Lisboa")],
            vec![CellValue::from("rua nova"), CellValue::from("Braga")],
        ],
    )?;

    // 1. Search
    let mut engine = FindEngine::new();
    let count = engine.search(&table, "lisboa", FindOptions::default())?;
    println!("1. Found {} cells containing 'lisboa'", count);

    // 2. Step and replace
    println!("\n2. Replacing one at a time...");
    while let Some(m) = engine.find_next(&table) {
        println!("   row {} {}: {}", m.row, m.column, m.original);
        engine.replace_current(&mut table, "Lisbon")?;
        if engine.match_count() == 0 {
            break;
        }
    }
    println!("   State: {:?}", engine.state());

    // 3. Replace all, with a preview
    println!("\n3. Replace-all 'rua' -> 'R.'...");
    let plan = engine.plan_replace_all(&table, "rua", "R.", FindOptions::default())?;
    println!("   {} cells will change", plan.count);
    let applied = engine.commit_replace_all(&mut table, &plan)?;
    println!("   {} cells changed", applied);

    println!("\n4. Result:");
    for row in table.iter_rows() {
        println!("   {:<22} {}", row[0].to_string(), row[1]);
    }

    println!("\n=== Example Complete ===");
    Ok(())
}
