//! Index selection expressions for the command line.

/// Parse slice expressions like "all", "1,3", "0:10:2" into sorted, unique
/// indices below `length`. Negative indices count from the end.
pub fn parse_slice_string(s: &str, length: usize) -> Result<Vec<usize>, String> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("all") {
        return Ok((0..length).collect());
    }

    let len = length as isize;
    let mut indices = std::collections::HashSet::new();

    for segment in s.split(',') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        if segment.contains(':') {
            let parts: Vec<Option<isize>> = segment
                .split(':')
                .map(|p| {
                    let t = p.trim();
                    if t.is_empty() {
                        Ok(None)
                    } else {
                        t.parse()
                            .map_err(|_| format!("Invalid slice segment: {:?}", segment))
                            .map(Some)
                    }
                })
                .collect::<Result<_, _>>()?;
            if parts.len() > 3 {
                return Err(format!("Invalid slice segment: {:?}", segment));
            }
            let step = parts.get(2).copied().flatten().unwrap_or(1);
            if step == 0 {
                return Err(format!("Slice step cannot be zero: {:?}", segment));
            }

            let (i, j) = slice_bounds(
                parts.first().copied().flatten(),
                parts.get(1).copied().flatten(),
                step,
                len,
            );
            let mut idx = i;
            while (step > 0 && idx < j) || (step < 0 && idx > j) {
                if idx >= 0 && idx < len {
                    indices.insert(idx as usize);
                }
                idx += step;
            }
        } else {
            let idx: isize = segment
                .parse()
                .map_err(|_| format!("Invalid slice segment: {:?}", segment))?;
            if idx < -len || idx >= len {
                return Err(format!("Index {} out of range", idx));
            }
            let idx = if idx < 0 { idx + len } else { idx };
            indices.insert(idx as usize);
        }
    }

    let mut out: Vec<usize> = indices.into_iter().collect();
    out.sort_unstable();
    Ok(out)
}

/// Resolve optional `start:stop` bounds against a sequence of `length`,
/// with the defaults and clamping of an ordinary slice.
fn slice_bounds(
    start: Option<isize>,
    stop: Option<isize>,
    step: isize,
    length: isize,
) -> (isize, isize) {
    let (lower, upper) = if step < 0 { (-1, length - 1) } else { (0, length) };
    let clamp = |v: isize| {
        let v = if v < 0 { v + length } else { v };
        v.clamp(lower, upper)
    };
    let start = start.map(clamp).unwrap_or(if step < 0 { upper } else { lower });
    let stop = stop.map(clamp).unwrap_or(if step < 0 { lower } else { upper });
    (start, stop)
}
