/// DBF Commander - tabular data engine for xBase files
///
/// Loads `.dbf` files into typed in-memory tables, pages and sorts them,
/// filters them with SQL, finds and replaces text, converts the text
/// encoding of whole files and writes edits back with a backup and an
/// atomic replace. Records are decoded and encoded in the file's own code
/// page. CSV and XML data can be imported into new or existing DBF files.

pub mod error;
pub mod column;
pub mod changeset;
pub mod table;
pub mod view;
pub mod backup;
pub mod dbf;
pub mod codepage;
pub mod persist;
pub mod query;
pub mod find;
pub mod import;
pub mod xml;
pub mod config;
pub mod session;

pub use error::{
    CellError, ConfigError, ConversionError, FindError, LoadError, QueryError, SaveError, SchemaError, SessionError,
};
pub use column::{CellValue, Column, ColumnType};
pub use changeset::{ChangeCursor, Changeset, IndexAdjuster, TableChange};
pub use table::{CsvOptions, MemorySource, Page, RecordSource, Row, Schema, Table};
pub use view::{Pagination, SortOrder, SortState};
pub use dbf::{DbfFileWriter, DbfHeader, DbfSource, FieldDescriptor};
pub use codepage::{convert, detect_encoding, Codepage, ConversionReport};
pub use persist::{save_table, FieldSpec, SaveOptions, SaveReport, TableFileWriter};
pub use query::{query, QueryBackend, SqliteBackend};
pub use find::{FindEngine, FindOptions, FindState, Match, ReplaceAllPlan};
pub use import::{import_csv, CsvImportOptions, CsvSource};
pub use xml::{export_xml, import_xml, to_xml, XmlImportOptions, XmlSource};
pub use config::Settings;
pub use session::{
    import_csv_to_dbf, import_to_dbf, import_xml_to_dbf, AppendReport, FileKind, ImportOutcome, SaveOutcome, Session,
};

#[cfg(test)]
mod integration_tests {
    use super::*;
    use crate::dbf::tests::{dbf_image, dbf_image_with_driver};
    use chrono::NaiveDate;
    use std::path::Path;

    fn write_shop(path: &Path) {
        let schema = Schema::try_new(vec![
            Column::with_width("PRODUCT", ColumnType::Text, 12, 0),
            Column::with_width("QTY", ColumnType::Integer, 5, 0),
            Column::with_width("PRICE", ColumnType::Decimal, 8, 2),
            Column::new("SINCE", ColumnType::Date),
        ])
        .unwrap();
        let date = |m, d| CellValue::Date(NaiveDate::from_ymd_opt(2024, m, d).unwrap());
        let mut table = Table::with_rows(
            "shop",
            schema,
            vec![
                vec![CellValue::from("Widget"), CellValue::Integer(10), CellValue::Decimal(9.99), date(1, 5)],
                vec![CellValue::from("Gadget"), CellValue::Integer(5), CellValue::Decimal(19.99), date(2, 1)],
                vec![CellValue::from("Doohickey"), CellValue::Integer(15), CellValue::Decimal(4.99), CellValue::Missing],
                vec![CellValue::from("Widget XL"), CellValue::Missing, CellValue::Decimal(14.5), date(3, 9)],
            ],
        )
        .unwrap();
        save_table(&mut table, path, &SaveOptions::default(), &DbfFileWriter).unwrap();
    }

    #[test]
    fn test_complete_workflow() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shop.dbf");
        write_shop(&path);

        let settings = Settings {
            rows_per_page: 2,
            ..Settings::default()
        };
        let mut session = Session::open_dbf(&path, settings).unwrap();
        assert_eq!(session.kind(), FileKind::Dbf);
        assert_eq!(session.base().len(), 4);
        assert_eq!(session.page_label(), "Page 1 of 2");

        // Filter, then back to the full table
        session.next_page();
        let view = session
            .execute_query("SELECT PRODUCT, PRICE FROM data WHERE PRODUCT LIKE 'Widget%' ORDER BY PRICE DESC")
            .unwrap();
        assert_eq!(view.len(), 2);
        assert_eq!(view.get_value(0, "PRODUCT").unwrap(), &CellValue::from("Widget XL"));
        assert_eq!(session.pagination().current_page(), 0);
        session.clear_filter();

        // Sort by quantity; missing sorts first
        session.toggle_sort("QTY").unwrap();
        assert_eq!(session.active().get_value(0, "PRODUCT").unwrap(), &CellValue::from("Widget XL"));
        assert_eq!(session.active().get_value(3, "PRODUCT").unwrap(), &CellValue::from("Doohickey"));

        // Rename every widget
        let plan = session.plan_replace_all("widget", "Sprocket", None).unwrap();
        assert_eq!(plan.count, 2);
        session.commit_replace_all(&plan).unwrap();

        // Text typed into a numeric column is accepted now and parsed on save
        session.set_cell(0, "QTY", CellValue::from("7")).unwrap();
        let added = session.add_record().unwrap();
        session.set_cell(added, "PRODUCT", CellValue::from("Gizmo")).unwrap();
        session.delete_records(&[1]).unwrap();

        let report = match session.save().unwrap() {
            SaveOutcome::Saved(report) => report,
            SaveOutcome::NothingToSave => panic!("expected changes to save"),
        };
        assert_eq!(report.records, 4);
        let backup = report.backup.unwrap();
        assert!(backup.exists());
        assert_eq!(DbfHeader::read(&backup).unwrap().record_count, 4);

        let reopened = Session::open_dbf(&path, Settings::default()).unwrap();
        let products: Vec<String> = reopened
            .base()
            .iter_rows()
            .map(|r| r[0].to_string())
            .collect();
        assert_eq!(products, vec!["Sprocket XL", "Sprocket", "Doohickey", "Gizmo"]);
        assert_eq!(reopened.base().get_value(0, "QTY").unwrap(), &CellValue::Integer(7));
        assert_eq!(reopened.base().get_value(3, "QTY").unwrap(), &CellValue::Missing);
    }

    #[test]
    fn test_bad_edit_fails_save_without_touching_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shop.dbf");
        write_shop(&path);
        let before = std::fs::read(&path).unwrap();

        let mut session = Session::open_dbf(&path, Settings::default()).unwrap();
        session.set_cell(1, "QTY", CellValue::from("lots")).unwrap();
        assert!(matches!(
            session.save(),
            Err(SessionError::Save(SaveError::InvalidValue { row: 1, .. }))
        ));
        assert!(session.is_modified());
        assert_eq!(std::fs::read(&path).unwrap(), before);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_structure_report_of_saved_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shop.dbf");
        write_shop(&path);

        let header = DbfHeader::read(&path).unwrap();
        assert_eq!(header.record_count, 4);
        let names: Vec<&str> = header.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["PRODUCT", "QTY", "PRICE", "SINCE"]);
        let report = header.structure_report("shop.dbf");
        assert!(report.contains("PRICE"));
        assert!(report.trim_end().ends_with("Total fields: 4"));
    }

    #[test]
    fn test_encoding_conversion_keeps_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("names.dbf");
        let original = dbf_image(&[("NAME", 'C', 6, 0)], &[b"Caf\xe9  ", b"na\xefve "]);
        std::fs::write(&path, &original).unwrap();
        assert_eq!(detect_encoding(&path).unwrap(), Codepage::Cp1252);

        let report = convert(&path, Codepage::Cp1252, Codepage::Cp437, true).unwrap();
        assert!(!report.lossy);
        assert!(report.backup.as_ref().unwrap().exists());
        assert_eq!(std::fs::read(report.backup.unwrap()).unwrap(), original);

        let converted = std::fs::read(&path).unwrap();
        let header_len = report.header_length;
        assert_eq!(header_len, 32 + 32 + 1);
        assert_eq!(&converted[..header_len], &original[..header_len]);
        assert_eq!(converted.len(), original.len());
        // é is 0x82 and ï is 0x8B in cp437
        assert_eq!(converted[header_len + 4], 0x82);
        assert_eq!(converted[header_len + 7 + 3], 0x8B);

        convert(&path, Codepage::Cp437, Codepage::Cp1252, false).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), original);
    }

    #[test]
    fn test_import_csv_and_save_as_dbf() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("clients.csv");
        std::fs::write(&csv_path, "client name;balance;vip\nAna;10.5;true\nBruno;-3;false\n").unwrap();

        let mut source = CsvSource::open(&csv_path, &CsvImportOptions::default()).unwrap();
        let mut session = Session::from_source("clients.csv", &mut source, false, Settings::default()).unwrap();
        assert_eq!(session.kind(), FileKind::Other);

        let dbf_path = dir.path().join("clients.dbf");
        let report = session.save_as(&dbf_path).unwrap();
        assert_eq!(report.records, 2);
        assert_eq!(session.kind(), FileKind::Dbf);

        let header = DbfHeader::read(&dbf_path).unwrap();
        let fields: Vec<(String, char)> = header.fields.iter().map(|f| (f.name.clone(), f.field_type)).collect();
        assert_eq!(
            fields,
            vec![
                ("CLIENT_NAM".to_string(), 'C'),
                ("BALANCE".to_string(), 'N'),
                ("VIP".to_string(), 'L'),
            ]
        );

        let reopened = Session::open_dbf(&dbf_path, Settings::default()).unwrap();
        assert_eq!(reopened.base().get_value(1, "BALANCE").unwrap(), &CellValue::Decimal(-3.0));
        assert_eq!(reopened.base().get_value(0, "VIP").unwrap(), &CellValue::Boolean(true));
    }

    #[test]
    fn test_query_view_is_independent_of_base_edits() {
        let schema = Schema::try_new(vec![Column::with_width("A", ColumnType::Text, 5, 0)]).unwrap();
        let rows = vec![vec![CellValue::from("foo")], vec![CellValue::from("bar")]];
        let mut source = MemorySource::new("t", schema, rows);
        let mut session = Session::from_source("t.dbf", &mut source, false, Settings::default()).unwrap();

        session.execute_query("SELECT * FROM data").unwrap();
        assert_eq!(session.find("foo", None).unwrap(), 1);
        assert!(matches!(session.replace_current("x"), Err(SessionError::ReadOnly(_))));

        session.clear_filter();
        session.set_cell(1, "A", CellValue::from("food")).unwrap();
        assert_eq!(session.find("foo", None).unwrap(), 2);
        assert_eq!(session.find_next().unwrap().row, 0);
    }

    /// Returns the raw bytes of record `index` (deletion flag included)
    fn record_bytes(image: &[u8], index: usize) -> Vec<u8> {
        let header = DbfHeader::parse(image).unwrap();
        let start = header.header_length as usize + index * header.record_length as usize;
        image[start..start + header.record_length as usize].to_vec()
    }

    fn edit_and_save(path: &Path, settings: Settings, text: &str) -> Vec<u8> {
        let mut session = Session::open_dbf(path, settings).unwrap();
        let added = session.add_record().unwrap();
        session.set_cell(added, "NAME", CellValue::from(text)).unwrap();
        assert!(matches!(session.save().unwrap(), SaveOutcome::Saved(_)));
        std::fs::read(path).unwrap()
    }

    #[test]
    fn test_cp1252_file_keeps_its_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cafe.dbf");
        std::fs::write(&path, dbf_image_with_driver(&[("NAME", 'C', 6, 0)], &[b"Caf\xe9  "], 0x03)).unwrap();

        let session = Session::open_dbf(&path, Settings::default()).unwrap();
        assert_eq!(session.base().get_value(0, "NAME").unwrap(), &CellValue::from("Café"));
        assert_eq!(session.base().codepage(), Some(Codepage::Cp1252));

        let saved = edit_and_save(&path, Settings::default(), "Señor");
        assert_eq!(saved[dbf::LANGUAGE_DRIVER_OFFSET], 0x03);
        assert_eq!(record_bytes(&saved, 0), b" Caf\xe9  ".to_vec());
        assert_eq!(record_bytes(&saved, 1), b" Se\xf1or ".to_vec());
    }

    #[test]
    fn test_cp437_file_keeps_its_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cafe.dbf");
        std::fs::write(&path, dbf_image_with_driver(&[("NAME", 'C', 6, 0)], &[b"Caf\x82  "], 0x01)).unwrap();

        // the language driver wins over the configured code page
        let session = Session::open_dbf(&path, Settings::default()).unwrap();
        assert_eq!(session.base().get_value(0, "NAME").unwrap(), &CellValue::from("Café"));

        let saved = edit_and_save(&path, Settings::default(), "Señor");
        assert_eq!(saved[dbf::LANGUAGE_DRIVER_OFFSET], 0x01);
        assert_eq!(record_bytes(&saved, 0), b" Caf\x82  ".to_vec());
        assert_eq!(record_bytes(&saved, 1), b" Se\xa4or ".to_vec());

        let reopened = Session::open_dbf(&path, Settings::default()).unwrap();
        assert_eq!(reopened.base().get_value(1, "NAME").unwrap(), &CellValue::from("Señor"));
    }

    #[test]
    fn test_unmarked_ascii_file_uses_configured_codepage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.dbf");
        std::fs::write(&path, dbf_image(&[("NAME", 'C', 6, 0)], &[b"Cafe  "])).unwrap();
        let settings = Settings {
            dbf_codepage: Codepage::Cp437,
            ..Settings::default()
        };

        let saved = edit_and_save(&path, settings, "Café");
        assert_eq!(saved[dbf::LANGUAGE_DRIVER_OFFSET], 0x01);
        assert_eq!(record_bytes(&saved, 1), b" Caf\x82  ".to_vec());
    }

    #[test]
    fn test_unmarked_non_ascii_file_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.dbf");
        std::fs::write(&path, dbf_image(&[("NAME", 'C', 6, 0)], &[b"Caf\xe9  "])).unwrap();

        let session = Session::open_dbf(&path, Settings::default()).unwrap();
        assert_eq!(session.base().get_value(0, "NAME").unwrap(), &CellValue::from("Café"));
        assert_eq!(session.base().codepage(), Some(Codepage::Cp1252));
    }

    #[test]
    fn test_xml_import_appends_to_existing_dbf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shop.dbf");
        write_shop(&path);
        let xml = dir.path().join("more.xml");
        std::fs::write(
            &xml,
            "<?xml version=\"1.0\"?>\n<items>\n  <record><product>Gizmo</product><qty>3</qty><colour>red</colour></record>\n</items>\n",
        )
        .unwrap();

        match import_xml_to_dbf(&xml, &path, &XmlImportOptions::default(), Settings::default()).unwrap() {
            ImportOutcome::Appended { append, save } => {
                assert_eq!(append.appended, 1);
                assert_eq!(append.matched, vec!["PRODUCT", "QTY"]);
                assert_eq!(append.ignored, vec!["COLOUR"]);
                assert!(save.unwrap().backup.is_some());
            }
            other => panic!("expected an append, got {:?}", other),
        }

        let session = Session::open_dbf(&path, Settings::default()).unwrap();
        assert_eq!(session.base().len(), 5);
        assert_eq!(session.base().get_value(4, "PRODUCT").unwrap(), &CellValue::from("Gizmo"));
        assert_eq!(session.base().get_value(4, "QTY").unwrap(), &CellValue::Integer(3));
        assert!(session.base().get_value(4, "PRICE").unwrap().is_missing());

        let exported = to_xml(session.base()).unwrap();
        assert!(exported.contains("<product>Gizmo</product>"));
    }
}
