// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Fixed-width tables for terminal output.

use crate::{catalog::Catalog, sync::ListedRuleSet};

use std::fmt::Write;

const ELLIPSIS: &str = "...";
const TYPE_WIDTH: usize = 8;
const TITLE_WIDTH: usize = 25;
const DATE_WIDTH: usize = 19;
const ID_WIDTH: usize = 32;
const REV_WIDTH: usize = 8;
const NAME_WIDTH: usize = 25;
const DESCRIPTION_WIDTH: usize = 40;
const CATEGORY_WIDTH: usize = 10;
const GIST_ID_WIDTH: usize = 36;
const GAP: &str = "  ";

/// Fit text into exactly `width` characters.
///
/// Short text is padded with spaces, long text is cut and ends in "...".
/// Width is counted in characters, not bytes.
pub fn fit(text: &str, width: usize) -> String {
    let count = text.chars().count();
    if count <= width {
        return format!("{text}{}", " ".repeat(width - count));
    }

    if width <= ELLIPSIS.len() {
        return text.chars().take(width).collect();
    }

    let mut cut = text.chars().take(width - ELLIPSIS.len()).collect::<String>();
    cut.push_str(ELLIPSIS);
    cut
}

/// Render listing of rule sets as a table.
///
/// Revision column is only shown in detail mode.
pub fn rule_set_table(listing: &[ListedRuleSet], detail: bool) -> String {
    let mut headers = vec![
        fit("Type", TYPE_WIDTH),
        fit("Title", TITLE_WIDTH),
        fit("Last Modified", DATE_WIDTH),
        fit("Gist ID", ID_WIDTH),
    ];
    let mut rule_width = TYPE_WIDTH + TITLE_WIDTH + DATE_WIDTH + ID_WIDTH + 3 * GAP.len();
    if detail {
        headers.push(fit("Rev", REV_WIDTH));
        rule_width += REV_WIDTH + GAP.len();
    }

    let mut table = String::new();
    push_row(&mut table, &headers);
    push_row(&mut table, &["-".repeat(rule_width)]);

    for entry in listing {
        let rule_set = &entry.rule_set;
        let kind = if rule_set.public { "Public" } else { "Private" };
        let title = match rule_set.title() {
            "" => "(No title)",
            title => title,
        };
        let date = rule_set.updated_at.format("%Y-%m-%d %H:%M:%S").to_string();

        let mut row = vec![
            fit(kind, TYPE_WIDTH),
            fit(title, TITLE_WIDTH),
            fit(&date, DATE_WIDTH),
            fit(&rule_set.id, ID_WIDTH),
        ];
        if detail {
            let revisions = entry.revisions.map(|rev| rev.to_string()).unwrap_or_default();
            row.push(fit(&revisions, REV_WIDTH));
        }
        push_row(&mut table, &row);
    }

    table
}

/// Render public catalog as a table.
///
/// Gist ids are printed in full so they can be pasted into `download --id`.
pub fn catalog_table(catalog: &Catalog) -> String {
    let mut table = String::new();
    push_row(
        &mut table,
        &[
            fit("Name", NAME_WIDTH),
            fit("Description", DESCRIPTION_WIDTH),
            fit("Category", CATEGORY_WIDTH),
            "Gist ID".into(),
        ],
    );
    let rule_width = NAME_WIDTH + DESCRIPTION_WIDTH + CATEGORY_WIDTH + GIST_ID_WIDTH + 3 * GAP.len();
    push_row(&mut table, &["-".repeat(rule_width)]);

    for entry in catalog.entries() {
        push_row(
            &mut table,
            &[
                fit(&entry.name, NAME_WIDTH),
                fit(&entry.description, DESCRIPTION_WIDTH),
                fit(entry.category.as_deref().unwrap_or_default(), CATEGORY_WIDTH),
                entry.gist_id.clone(),
            ],
        );
    }

    table
}

fn push_row(table: &mut String, cells: &[String]) {
    // INVARIANT: Writing into a string never fails.
    let _ = writeln!(table, "{}", cells.join(GAP).trim_end());
}
