//! Scenario listing.

use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, ContentArrangement, Table};
use dynamo_sim::Scenario;

/// Prints every scenario with a one-line description.
pub fn run() {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Scenario").add_attribute(Attribute::Bold),
            Cell::new("Shows").add_attribute(Attribute::Bold),
        ]);

    for scenario in Scenario::all() {
        table.add_row(vec![scenario.name(), scenario.description()]);
    }
    println!("{table}");
}
