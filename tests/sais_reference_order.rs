//! S4: SA-IS on `"mississippi"` (plus trailing `p`, per the spec's own
//! worked example) reproduces the classical reference suffix-array order.

use corpus_substrate::suffix::sa_is;

#[test]
fn mississippi_reference_order() {
    // m=3, i=2, s=1, p=4, $=0
    let ids: Vec<u32> = vec![3, 3, 2, 2, 1, 1, 2, 2, 1, 1, 2, 2, 4, 4, 2, 2, 0];
    let sa = sa_is(&ids, 5);
    let expected: Vec<u32> = vec![16, 15, 14, 10, 6, 2, 11, 7, 3, 1, 0, 13, 12, 9, 5, 8, 4];
    assert_eq!(sa, expected);
}
