// Neighbour helpers on a `width x height` lattice stored row-major.

/// Von Neumann neighbourhood offsets, in a fixed order.
const OFFSETS: [(i32, i32); 4] = [(0, -1), (-1, 0), (1, 0), (0, 1)];

#[inline(always)]
pub fn get_site_idx(x: usize, y: usize, width: usize) -> usize {
    y * width + x
}

/// Calls `f` with the index of every in-bounds neighbour of `(x, y)`.
/// Stops early when `f` returns `false`.
#[inline(always)]
pub fn for_each_neighbor<F>(x: usize, y: usize, width: usize, height: usize, mut f: F)
where
    F: FnMut(usize) -> bool,
{
    for (dx, dy) in OFFSETS {
        let nx = x as i32 + dx;
        let ny = y as i32 + dy;
        if nx >= 0 && nx < width as i32 && ny >= 0 && ny < height as i32 {
            if !f(get_site_idx(nx as usize, ny as usize, width)) {
                return;
            }
        }
    }
}

/// Index of the first neighbour of `(x, y)` for which `f` returns `true`.
#[inline(always)]
pub fn find_first_neighbor<F>(x: usize, y: usize, width: usize, height: usize, mut f: F) -> Option<usize>
where
    F: FnMut(usize) -> bool,
{
    let mut found = None;
    for_each_neighbor(x, y, width, height, |idx| {
        if f(idx) {
            found = Some(idx);
            false
        } else {
            true
        }
    });
    found
}

/// Sum of the four neighbour values, reflecting at the border (a missing neighbour counts as
/// the centre value, which gives a zero-flux boundary).
#[inline(always)]
pub fn neighbor_sum(field: &[f64], x: usize, y: usize, width: usize, height: usize) -> f64 {
    let centre = field[get_site_idx(x, y, width)];
    let mut sum = 0.0;
    let mut seen = 0;
    for_each_neighbor(x, y, width, height, |idx| {
        sum += field[idx];
        seen += 1;
        true
    });
    sum + centre * (4 - seen) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corner_has_two_neighbors() {
        let mut seen = Vec::new();
        for_each_neighbor(0, 0, 3, 3, |idx| {
            seen.push(idx);
            true
        });
        assert_eq!(seen, vec![1, 3]);
    }

    #[test]
    fn test_find_first_neighbor() {
        assert_eq!(find_first_neighbor(1, 1, 3, 3, |idx| idx > 3), Some(5));
        assert_eq!(find_first_neighbor(1, 1, 3, 3, |_| false), None);
    }

    #[test]
    fn test_neighbor_sum_reflects_at_border() {
        let field = vec![1.0; 9];
        assert_eq!(neighbor_sum(&field, 0, 0, 3, 3), 4.0);
        assert_eq!(neighbor_sum(&field, 1, 1, 3, 3), 4.0);
    }
}
