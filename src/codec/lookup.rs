//! Host-side lookup table splitting

use bytes::Bytes;

/// Split a lookup table into the three parts served as `Lookup1..3`.
///
/// The first two parts take a third of the table each (rounded down), the
/// last part takes the remainder.
pub fn split_lookup(table: &Bytes) -> [Bytes; 3] {
    let third = table.len() / 3;
    [table.slice(..third), table.slice(third..2 * third), table.slice(2 * third..)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LookupAssembler, LookupPart};
    use proptest::prelude::*;

    #[test]
    fn remainder_goes_to_last_part() {
        let parts = split_lookup(&Bytes::from(vec![0u8; 256]));
        let lens: Vec<usize> = parts.iter().map(Bytes::len).collect();
        assert_eq!(lens, vec![85, 85, 86]);
    }

    proptest! {
        #[test]
        fn any_three_way_split_reassembles(
            table in prop::collection::vec(any::<u8>(), 0..512),
            a in any::<prop::sample::Index>(),
            b in any::<prop::sample::Index>(),
        ) {
            let table = Bytes::from(table);
            let mut cuts = [a.index(table.len() + 1), b.index(table.len() + 1)];
            cuts.sort_unstable();

            let mut assembler = LookupAssembler::new();
            assembler.insert(LookupPart::First, table.slice(..cuts[0]));
            assembler.insert(LookupPart::Second, table.slice(cuts[0]..cuts[1]));
            assembler.insert(LookupPart::Third, table.slice(cuts[1]..));

            let assembled = assembler.assemble().unwrap();
            prop_assert_eq!(assembled.as_bytes(), &table);
        }

        #[test]
        fn host_split_reassembles(table in prop::collection::vec(any::<u8>(), 0..512)) {
            let table = Bytes::from(table);
            let mut assembler = LookupAssembler::new();
            for (part, data) in LookupPart::ALL.into_iter().zip(split_lookup(&table)) {
                assembler.insert(part, data);
            }
            let assembled = assembler.assemble().unwrap();
            prop_assert_eq!(assembled.as_bytes(), &table);
        }
    }
}
