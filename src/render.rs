use crate::types::{Assignment, RemnantClass};

const MAX_WIDTH: f64 = 80.0;

/// Draws one cut bar to scale, pieces left to right, leftover at the end.
///
/// ```text
/// +--------+--------+--------+~~~~~+
/// |  2000  |  2000  |  1500  |     |
/// +--------+--------+--------+~~~~~+
///                ^ weld
/// ```
///
/// Reusable leftovers are fenced with `~`, scrap with `x`.
pub fn render_bar(assignment: &Assignment) -> String {
    let stock = &assignment.stock;
    let pattern = &assignment.pattern;
    if stock.length <= 0.0 {
        return String::new();
    }
    let scale = MAX_WIDTH / stock.length;
    let width = (stock.length * scale).round() as usize;

    let mut top = vec![' '; width + 1];
    let mut mid = vec![' '; width + 1];
    let mut pos = 0.0;

    for cut in &pattern.cuts {
        for _ in 0..cut.count {
            let sx = (pos * scale).round() as usize;
            let ex = ((pos + cut.length) * scale).round() as usize;
            draw_segment(&mut top, sx, ex, '-');
            label(&mut mid, sx, ex, &format!("{}", cut.length));
            pos += cut.length;
        }
    }

    if pattern.leftover > 0.0 {
        // Keep at least one fill cell so short leftovers stay visible.
        let sx = ((pos * scale).round() as usize).min(width.saturating_sub(2));
        let fill = match pattern.leftover_class {
            RemnantClass::Reusable => '~',
            RemnantClass::Waste => 'x',
        };
        draw_segment(&mut top, sx, width, fill);
    }
    top[0] = '+';
    top[width] = '+';
    mid[0] = '|';
    mid[width] = '|';

    let mut result = String::new();
    let edge: String = top.iter().collect();
    result.push_str(&edge);
    result.push('\n');
    result.push_str(mid.iter().collect::<String>().trim_end());
    result.push('\n');
    result.push_str(&edge);
    result.push('\n');

    if stock.weld_count > 0 {
        let mut joints = vec![' '; width + 1];
        let mut at = 0.0;
        for member in &stock.members[..stock.members.len() - 1] {
            at += member.length;
            let x = (at * scale).round() as usize;
            if x <= width {
                joints[x] = '^';
            }
        }
        let line: String = joints.iter().collect();
        result.push_str(line.trim_end());
        result.push_str(" weld");
        result.push('\n');
    }
    result
}

fn draw_segment(row: &mut [char], sx: usize, ex: usize, fill: char) {
    let ex = ex.min(row.len() - 1);
    for c in row.iter_mut().take(ex).skip(sx + 1) {
        *c = fill;
    }
    if sx < row.len() {
        row[sx] = '+';
    }
    row[ex] = '+';
}

/// Centers `text` between two edges, or drops it when it doesn't fit.
fn label(row: &mut [char], sx: usize, ex: usize, text: &str) {
    let ex = ex.min(row.len() - 1);
    if sx < row.len() {
        row[sx] = '|';
    }
    row[ex] = '|';
    let chars: Vec<char> = text.chars().collect();
    let inner = ex.saturating_sub(sx + 1);
    if chars.len() > inner {
        return;
    }
    let start = sx + 1 + (inner - chars.len()) / 2;
    for (i, &ch) in chars.iter().enumerate() {
        row[start + i] = ch;
    }
}
