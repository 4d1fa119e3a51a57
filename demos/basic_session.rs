/// Basic Session Example
///
/// This example demonstrates:
/// - Writing a DBF file from an in-memory table
/// - Opening it in a session and paging through it
/// - Filtering with SQL and sorting by a column
/// - Editing a record and saving with a backup

use dbf_commander::{
    save_table, CellValue, Column, ColumnType, DbfFileWriter, SaveOptions, SaveOutcome, Schema, Session, Settings,
    Table,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== DBF Commander Session Example ===\n");

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("clients.dbf");

    // 1. Create a DBF file
    println!("1. Writing {}...", path.display());
    let schema = Schema::try_new(vec![
        Column::with_width("NAME", ColumnType::Text, 20, 0),
        Column::with_width("CITY", ColumnType::Text, 15, 0),
        Column::with_width("BALANCE", ColumnType::Decimal, 10, 2),
    ])?;
    let cities = ["Lisbon", "Porto", "Braga", "Faro"];
    let rows = (0..12)
        .map(|i| {
            vec![
                CellValue::Text(format!("Client {:02}", i)),
                CellValue::from(cities[i % cities.len()]),
                CellValue::Decimal(i as f64 * 37.5 - 100.0),
            ]
        })
        .collect();
    let mut table = Table::with_rows("clients", schema, rows)?;
    save_table(&mut table, &path, &SaveOptions::default(), &DbfFileWriter)?;
    println!("   {} records written\n", table.len());

    // 2. Open and page
    println!("2. Opening with 5 rows per page...");
    let settings = Settings {
        rows_per_page: 5,
        ..Settings::default()
    };
    let mut session = Session::open_dbf(&path, settings)?;
    session.last_page();
    let page = session.current_page();
    println!("   {}: rows {}..{}\n", session.page_label(), page.first_row, page.first_row + page.rows.len());

    // 3. Filter
    println!("3. Clients in Porto with a positive balance...");
    let view = session.execute_query("SELECT NAME, BALANCE FROM data WHERE CITY = 'Porto' AND BALANCE > 0")?;
    for row in view.iter_rows() {
        println!("   {} {}", row[0], row[1]);
    }
    println!("   Back to {}\n", session.page_label());
    session.clear_filter();

    // 4. Sort
    println!("4. Sorting by BALANCE, twice...");
    session.toggle_sort("BALANCE")?;
    let state = session.toggle_sort("BALANCE")?;
    println!("   Sorted {:?} on {}", state.order, state.column);
    println!("   Top balance: {}\n", session.active().get_value(0, "BALANCE")?);

    // 5. Edit and save
    println!("5. Editing and saving...");
    session.set_cell(0, "CITY", CellValue::from("Coimbra"))?;
    match session.save()? {
        SaveOutcome::Saved(report) => {
            println!("   Saved {} records", report.records);
            if let Some(backup) = report.backup {
                println!("   Backup at {}", backup.display());
            }
        }
        SaveOutcome::NothingToSave => println!("   Nothing to save"),
    }

    println!("\n=== Example Complete ===");
    Ok(())
}
