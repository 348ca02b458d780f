//! XLSX export of the industry class statistics.

use rust_xlsxwriter::{Format, Workbook, XlsxError};

use crate::industry::IndustryClassInfo;

pub const SHEET_NAME: &str = "Industry Info";
pub const FILE_NAME: &str = "industry_info.xlsx";
pub const CONTENT_TYPE: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Rates render with exactly six decimals.
pub const RATE_NUM_FORMAT: &str = "0.000000";

pub const HEADERS: [&str; 15] = [
    "Index",
    "Domain Name",
    "Industry Class Name",
    "TOTAL",
    "Y",
    "K",
    "N",
    "비상장외감",
    "비외감",
    "TOTAL Rate",
    "Y Rate",
    "K Rate",
    "N Rate",
    "비상장외감 Rate",
    "비외감 Rate",
];

const FIRST_COUNT_COL: u16 = 3;
const FIRST_RATE_COL: u16 = 9;

/// Render `rows` as a complete workbook held in memory.
pub fn industry_info_xlsx(rows: &[IndustryClassInfo]) -> Result<Vec<u8>, XlsxError> {
    let mut workbook = Workbook::new();
    let header_format = Format::new().set_bold();
    let rate_format = Format::new().set_num_format(RATE_NUM_FORMAT);

    let sheet = workbook.add_worksheet();
    sheet.set_name(SHEET_NAME)?;

    for (col, header) in HEADERS.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *header, &header_format)?;
    }

    for (i, info) in rows.iter().enumerate() {
        let row = (i + 1) as u32;
        sheet.write_number(row, 0, (i + 1) as f64)?;
        sheet.write_string(row, 1, &info.domain_name)?;
        sheet.write_string(row, 2, &info.industry_class_name)?;

        for (offset, count) in info.cnt.to_array().into_iter().enumerate() {
            sheet.write_number(row, FIRST_COUNT_COL + offset as u16, count as f64)?;
        }
        for (offset, rate) in info.rate.to_array().into_iter().enumerate() {
            sheet.write_number_with_format(row, FIRST_RATE_COL + offset as u16, rate, &rate_format)?;
        }
    }

    workbook.save_to_buffer()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::industry::tests::sample_info;
    use calamine::{open_workbook_from_rs, Data, Reader, Xlsx};
    use std::io::{Cursor, Read};

    fn read_back(bytes: Vec<u8>) -> calamine::Range<Data> {
        let mut workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(bytes)).unwrap();
        workbook.worksheet_range(SHEET_NAME).unwrap()
    }

    #[test]
    fn one_header_row_plus_one_row_per_record() {
        let rows = vec![
            sample_info("Energy", "Solar", 10),
            sample_info("Energy", "Wind", 20),
            sample_info("Materials", "Silicon", 40),
        ];
        let range = read_back(industry_info_xlsx(&rows).unwrap());

        assert_eq!(range.height(), rows.len() + 1);
        assert_eq!(range.width(), HEADERS.len());
        assert_eq!(range.get((0, 7)), Some(&Data::String("비상장외감".into())));
    }

    #[test]
    fn columns_follow_the_fixed_order() {
        let range = read_back(industry_info_xlsx(&[sample_info("Energy", "Solar", 10)]).unwrap());

        assert_eq!(range.get((1, 0)), Some(&Data::Float(1.0)));
        assert_eq!(range.get((1, 1)), Some(&Data::String("Energy".into())));
        assert_eq!(range.get((1, 2)), Some(&Data::String("Solar".into())));
        assert_eq!(range.get((1, 3)), Some(&Data::Float(10.0)));
        assert_eq!(range.get((1, 8)), Some(&Data::Float(4.0)));
        assert_eq!(range.get((1, 9)), Some(&Data::Float(1.0)));
        assert_eq!(range.get((1, 10)), Some(&Data::Float(0.1)));
        assert_eq!(range.get((1, 14)), Some(&Data::Float(0.4)));
    }

    #[test]
    fn empty_input_still_has_the_header() {
        let range = read_back(industry_info_xlsx(&[]).unwrap());
        assert_eq!(range.height(), 1);
    }

    fn xml_part(bytes: &[u8], name: &str) -> String {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut xml = String::new();
        archive.by_name(name).unwrap().read_to_string(&mut xml).unwrap();
        xml
    }

    /// Value of `name="..."` inside the attribute text of one element.
    fn attr<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
        let needle = format!(" {name}=\"");
        let start = tag.find(&needle)? + needle.len();
        let len = tag[start..].find('"')?;
        Some(&tag[start..start + len])
    }

    #[test]
    fn every_rate_cell_carries_the_six_decimal_format() {
        let rows = vec![
            sample_info("Energy", "Solar", 10),
            sample_info("Energy", "Wind", 20),
            sample_info("Materials", "Silicon", 40),
        ];
        let bytes = industry_info_xlsx(&rows).unwrap();

        let styles = xml_part(&bytes, "xl/styles.xml");
        let num_fmt_id = styles
            .split("<numFmt ")
            .skip(1)
            .map(|tag| format!(" {tag}"))
            .find(|tag| attr(tag, "formatCode") == Some("0.000000"))
            .and_then(|tag| attr(&tag, "numFmtId").map(str::to_string))
            .expect("no 0.000000 number format in styles.xml");

        let cell_xfs = styles
            .split("<cellXfs")
            .nth(1)
            .and_then(|rest| rest.split("</cellXfs>").next())
            .unwrap();
        let rate_styles: Vec<String> = cell_xfs
            .split("<xf ")
            .skip(1)
            .enumerate()
            .filter(|(_, tag)| attr(&format!(" {tag}"), "numFmtId") == Some(num_fmt_id.as_str()))
            .map(|(index, _)| index.to_string())
            .collect();
        assert!(!rate_styles.is_empty());

        let sheet = xml_part(&bytes, "xl/worksheets/sheet1.xml");
        let mut rate_cells = 0;
        for cell in sheet.split("<c ").skip(1) {
            let tag = format!(" {}", cell.split('>').next().unwrap_or_default());
            let reference = attr(&tag, "r").unwrap();
            let (col, row) = reference.split_at(reference.find(|c: char| c.is_ascii_digit()).unwrap());
            if row.parse::<usize>().unwrap() < 2 {
                continue;
            }
            let style = attr(&tag, "s").map(str::to_string);
            let has_rate_style = style.as_ref().is_some_and(|s| rate_styles.contains(s));
            if matches!(col, "J" | "K" | "L" | "M" | "N" | "O") {
                assert!(has_rate_style, "{reference} has style {style:?}");
                rate_cells += 1;
            } else {
                assert!(!has_rate_style, "{reference} should not use the rate format");
            }
        }
        assert_eq!(rate_cells, rows.len() * 6);
    }
}
