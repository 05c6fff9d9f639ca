use serde::Serialize;

/// One row of the static company category table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Category {
    pub index: u8,
    pub label: &'static str,
}

/// Company categories, addressed by the single digit that prefixes a company
/// folder name.
pub const CATEGORIES: [Category; 10] = [
    Category { index: 0, label: "Own union" },
    Category { index: 1, label: "Subcontractor" },
    Category { index: 2, label: "Furnace builder" },
    Category { index: 3, label: "Sole proprietor" },
    Category { index: 4, label: "Prime contractor" },
    Category { index: 5, label: "Leasing company" },
    Category { index: 6, label: "Sales company" },
    Category { index: 7, label: "Sales company 2" },
    Category { index: 8, label: "Recruiting" },
    Category { index: 9, label: "General company" },
];

pub fn categories() -> &'static [Category] {
    &CATEGORIES
}

pub fn category_label(index: u8) -> Option<&'static str> {
    CATEGORIES.iter().find(|c| c.index == index).map(|c| c.label)
}

/// Reverse lookup by label.
pub fn category_index(label: &str) -> Option<u8> {
    CATEGORIES.iter().find(|c| c.label == label).map(|c| c.index)
}
