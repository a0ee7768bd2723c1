//! Passive balancing cell selection.
//!
//! Balancing channels are organized in sections of 5 channels sharing a
//! common thermal zone; adjacent channels within a section must never be
//! switched on at the same time.

/// Number of balancing channels per section.
pub const SECTION_CHANNELS: usize = 5;

/// Selects the cells to balance, as a bitmask (bit 0 = first cell).
///
/// Candidates are the cells more than `target_diff` above `v_min`. Within
/// each section they are picked greedily in order of descending voltage,
/// skipping any cell adjacent to one already selected in that section.
pub fn select_cells(voltages: &[f32], v_min: f32, target_diff: f32, num_sections: usize) -> u32 {
    let mut selected = 0u32;

    for section in 0..num_sections {
        // find cells which should be balanced and sort them by voltage
        let mut cell_list = [0usize; SECTION_CHANNELS];
        let mut cell_counter = 0;
        for i in 0..SECTION_CHANNELS {
            let cell_num = section * SECTION_CHANNELS + i;
            if cell_num >= voltages.len() {
                break;
            }
            if voltages[cell_num] - v_min > target_diff {
                let mut j = cell_counter;
                while j > 0
                    && voltages[section * SECTION_CHANNELS + cell_list[j - 1]]
                        < voltages[cell_num]
                {
                    cell_list[j] = cell_list[j - 1];
                    j -= 1;
                }
                cell_list[j] = i;
                cell_counter += 1;
            }
        }

        let mut section_flags = 0u32;
        for &channel in &cell_list[..cell_counter] {
            let flags_new = section_flags | (1 << channel);
            // neighbouring channels within the section are not allowed
            if (flags_new << 1) & flags_new != 0 {
                continue;
            }
            section_flags = flags_new;
        }

        selected |= section_flags << (section * SECTION_CHANNELS);
    }

    selected
}

/// Returns true if the mask switches on two adjacent channels within any
/// section, which drivers must reject.
pub fn mask_has_adjacent_cells(mask: u32, num_sections: usize) -> bool {
    for section in 0..num_sections {
        let section_mask = (mask >> (section * SECTION_CHANNELS)) & 0x1F;
        if (section_mask << 1) & section_mask != 0 {
            return true;
        }
    }
    false
}
