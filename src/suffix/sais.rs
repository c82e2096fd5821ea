//! SA-IS suffix array construction (spec §4.8, steps 1-7): linear-time
//! induced sorting with the classical L/S classification, LMS placement,
//! and recursive naming of LMS-substrings.
//!
//! This is plain algorithmic code with no teacher analogue in the pack
//! (none of the example repos build suffix arrays); it is grounded
//! directly on the spec's step-by-step description of Ge Nong's SA-IS
//! algorithm rather than on any one source file.

/// Classifies every position as S-type (`true`) or L-type (`false`) with a
/// single right-to-left pass (spec §4.8 step 1). The sentinel position
/// (the last one) is S-type by convention.
fn classify(s: &[u32]) -> Vec<bool> {
    let n = s.len();
    let mut is_s = vec![false; n];
    is_s[n - 1] = true;
    for i in (0..n - 1).rev() {
        is_s[i] = match s[i].cmp(&s[i + 1]) {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Greater => false,
            std::cmp::Ordering::Equal => is_s[i + 1],
        };
    }
    is_s
}

#[inline]
fn is_lms(is_s: &[bool], i: usize) -> bool {
    i > 0 && is_s[i] && !is_s[i - 1]
}

fn bucket_sizes(s: &[u32], alphabet_size: usize) -> Vec<usize> {
    let mut sizes = vec![0usize; alphabet_size];
    for &c in s {
        sizes[c as usize] += 1;
    }
    sizes
}

fn bucket_heads(sizes: &[usize]) -> Vec<usize> {
    let mut heads = vec![0usize; sizes.len()];
    let mut sum = 0;
    for (head, &size) in heads.iter_mut().zip(sizes) {
        *head = sum;
        sum += size;
    }
    heads
}

fn bucket_tails(sizes: &[usize]) -> Vec<usize> {
    let mut tails = vec![0usize; sizes.len()];
    let mut sum = 0;
    for (tail, &size) in tails.iter_mut().zip(sizes) {
        sum += size;
        *tail = sum.saturating_sub(1);
    }
    tails
}

/// Places LMS positions into the tails of their buckets (spec §4.8 step 3),
/// then induces L-positions left-to-right and S-positions right-to-left
/// (step 4), using fresh local bucket cursors each pass.
fn induce_sort(sa: &mut [u32], s: &[u32], is_s: &[bool], sizes: &[usize], lms_in_order: &[u32]) {
    sa.fill(u32::MAX);

    let mut tails = bucket_tails(sizes);
    for &i in lms_in_order.iter().rev() {
        let c = s[i as usize] as usize;
        sa[tails[c]] = i;
        tails[c] = tails[c].wrapping_sub(1);
    }

    let mut heads = bucket_heads(sizes);
    for i in 0..sa.len() {
        let x = sa[i];
        if x == u32::MAX || x == 0 {
            continue;
        }
        let j = (x - 1) as usize;
        if !is_s[j] {
            let c = s[j] as usize;
            sa[heads[c]] = j as u32;
            heads[c] += 1;
        }
    }

    let mut tails = bucket_tails(sizes);
    for i in (0..sa.len()).rev() {
        let x = sa[i];
        if x == u32::MAX || x == 0 {
            continue;
        }
        let j = (x - 1) as usize;
        if is_s[j] {
            let c = s[j] as usize;
            sa[tails[c]] = j as u32;
            tails[c] = tails[c].wrapping_sub(1);
        }
    }
}

/// Whether the LMS-substrings starting at `i` and `j` are identical (same
/// length, same symbols, same L/S types throughout) -- spec §4.8 step 5.
fn lms_substrings_equal(s: &[u32], is_s: &[bool], i: u32, j: u32) -> bool {
    if i == j {
        return true;
    }
    let n = s.len();
    let (mut i, mut j) = (i as usize, j as usize);
    loop {
        let i_end = i == n - 1;
        let j_end = j == n - 1;
        if i_end || j_end {
            return i_end && j_end;
        }
        if s[i] != s[j] || is_s[i] != is_s[j] {
            return false;
        }
        i += 1;
        j += 1;
        let i_lms = is_lms(is_s, i);
        let j_lms = is_lms(is_s, j);
        if i_lms && j_lms {
            return true;
        }
        if i_lms != j_lms {
            return false;
        }
    }
}

/// Builds the suffix array of `s`, an alphabet of `alphabet_size` dense
/// symbols `0..alphabet_size` where symbol `0` appears exactly once, at the
/// final position, as the unique smallest "sentinel" (spec §4.8's
/// end-of-data mark). Returns a permutation of `0..s.len()`.
pub fn sa_is(s: &[u32], alphabet_size: usize) -> Vec<u32> {
    let n = s.len();
    if n == 0 {
        return Vec::new();
    }
    if n == 1 {
        return vec![0];
    }

    let is_s = classify(s);
    let sizes = bucket_sizes(s, alphabet_size);

    let lms_positions: Vec<u32> = (0..n).filter(|&i| is_lms(&is_s, i)).map(|i| i as u32).collect();

    let mut sa = vec![u32::MAX; n];
    induce_sort(&mut sa, s, &is_s, &sizes, &lms_positions);

    if lms_positions.len() > 1 {
        // Step 5: name LMS-substrings in the order they now appear in `sa`.
        let lms_in_sa_order: Vec<u32> =
            sa.iter().copied().filter(|&x| is_lms(&is_s, x as usize)).collect();

        let mut names = vec![u32::MAX; n];
        let mut name = 0u32;
        names[lms_in_sa_order[0] as usize] = 0;
        let mut prev = lms_in_sa_order[0];
        for &cur in &lms_in_sa_order[1..] {
            if !lms_substrings_equal(s, &is_s, prev, cur) {
                name += 1;
            }
            names[cur as usize] = name;
            prev = cur;
        }
        let num_names = (name + 1) as usize;

        let reduced: Vec<u32> = lms_positions.iter().map(|&p| names[p as usize]).collect();

        let reduced_sa = if num_names == lms_positions.len() {
            // Step 6: names already distinct, invert directly.
            let mut inverted = vec![0u32; reduced.len()];
            for (i, &name) in reduced.iter().enumerate() {
                inverted[name as usize] = i as u32;
            }
            inverted
        } else {
            // Step 6: recurse on the (strictly smaller) name sequence.
            sa_is(&reduced, num_names)
        };

        // Step 7: map the recursively-sorted LMS order back to original
        // positions and re-run induction on the full problem.
        let sorted_lms: Vec<u32> = reduced_sa.iter().map(|&i| lms_positions[i as usize]).collect();
        induce_sort(&mut sa, s, &is_s, &sizes, &sorted_lms);
    }

    sa
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_symbol_run() {
        let s = [1, 1, 1, 0];
        let sa = sa_is(&s, 2);
        assert_eq!(sa, vec![3, 2, 1, 0]);
    }

    #[test]
    fn classical_mississippi_reference_order() {
        // "mmiissiissiippii$" with m=3, i=2, s=1, p=4, $=0 (spec §8 S4).
        let s = [3, 3, 2, 2, 1, 1, 2, 2, 1, 1, 2, 2, 4, 4, 2, 2, 0];
        let sa = sa_is(&s, 5);
        assert_eq!(sa, vec![16, 15, 14, 10, 6, 2, 11, 7, 3, 1, 0, 13, 12, 9, 5, 8, 4]);
    }

    #[test]
    fn sorted_order_is_lexicographic() {
        let s = [2, 1, 3, 1, 2, 1, 3, 0];
        let sa = sa_is(&s, 4);
        for w in sa.windows(2) {
            let (a, b) = (w[0] as usize, w[1] as usize);
            assert!(s[a..] <= s[b..] || s[a..].starts_with(&s[b..]));
        }
    }
}
