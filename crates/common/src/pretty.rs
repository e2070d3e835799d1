use crate::PageSummary;
use tabled::{Table, Tabled, settings};

/// Predefined output styles that map to `tabled` styles.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum TableStyleKind {
    #[default]
    Modern,
    Ascii,
    Plain,
}

impl TableStyleKind {
    fn apply(self, table: &mut Table) {
        match self {
            Self::Modern => table.with(settings::Style::modern()),
            Self::Ascii => table.with(settings::Style::ascii()),
            Self::Plain => table.with(settings::Style::empty()),
        };
    }
}

/// Render a page dump into a human-friendly table string.
pub fn render_page_summaries(pages: &[PageSummary], style: TableStyleKind) -> String {
    #[derive(Clone, Tabled)]
    struct PageRow {
        #[tabled(rename = "Page")]
        addr: u64,
        #[tabled(rename = "Depth")]
        depth: usize,
        #[tabled(rename = "Kind")]
        kind: &'static str,
        #[tabled(rename = "Keys")]
        keys: usize,
        #[tabled(rename = "Used")]
        used: String,
    }

    let rows: Vec<PageRow> = pages
        .iter()
        .map(|page| PageRow {
            addr: page.addr.0,
            depth: page.depth,
            kind: if page.internal { "node" } else { "leaf" },
            keys: page.keys,
            used: format_fill(page),
        })
        .collect();

    render_structured_rows(&rows, style)
}

/// Render any `Tabled` rows with the provided style.
pub fn render_structured_rows<T>(rows: &[T], style: TableStyleKind) -> String
where
    T: Tabled + Clone,
{
    if rows.is_empty() {
        return "<empty>".into();
    }

    let mut table = Table::new(rows.to_vec());
    style.apply(&mut table);
    table.to_string()
}

/// Format the fill of a page as `used/block (pct%)`.
pub fn format_fill(page: &PageSummary) -> String {
    format!(
        "{}/{} ({:.0}%)",
        page.used,
        page.block_length,
        page.fill() * 100.0
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PageAddr;

    #[test]
    fn page_dump_renders_headers() {
        let pages = vec![PageSummary {
            addr: PageAddr(1024),
            depth: 0,
            internal: false,
            keys: 3,
            used: 512,
            block_length: 1024,
        }];

        let rendered = render_page_summaries(&pages, TableStyleKind::Modern);
        assert!(rendered.contains("Page"));
        assert!(rendered.contains("leaf"));
        assert!(rendered.contains("512/1024 (50%)"));
    }

    #[test]
    fn empty_dumps_render_placeholder() {
        assert_eq!(render_page_summaries(&[], TableStyleKind::Plain), "<empty>");
    }
}
