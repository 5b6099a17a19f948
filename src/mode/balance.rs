//! Balancing: the common mode of a multi-branch clause.
//!
//! Inside any clause that may yield from several branches (serial with
//! completers, conditional, case, united case) the clause mode is the unique
//! mode every branch can be STRONG-coerced to. Candidates are tried in order
//! of increasing dereferencing depth; when no single branch mode fits, the
//! united mode over the deflexed branches is the fallback.

use super::{DeflexRegime, ModeId, ModeTable, Sort, flatten_union};

impl ModeTable {
    /// Balance the yields of a clause's branches.
    ///
    /// SKIP, NIL and jump branches adapt to whatever the others need and do
    /// not vote. Returns `None` when no common mode exists.
    pub fn balance(&mut self, branches: &[ModeId], regime: DeflexRegime) -> Option<ModeId> {
        let voting: Vec<ModeId> = branches
            .iter()
            .map(|&b| self.chase(b))
            .filter(|&b| !self.is_hip(b))
            .collect();
        match voting.as_slice() {
            [] => return Some(self.hip_mode),
            [only] => return Some(*only),
            _ => {}
        }

        // Candidates of increasing dereferencing depth, branch by branch.
        let chains: Vec<Vec<ModeId>> = voting
            .iter()
            .map(|&b| {
                let mut chain = vec![b];
                let mut current = b;
                loop {
                    if let Some(target) = self.ref_target(current) {
                        current = target;
                    } else if let Some(result) = self.proc_result(current) {
                        current = result;
                    } else {
                        break;
                    }
                    chain.push(current);
                }
                chain
            })
            .collect();
        let deepest = chains.iter().map(Vec::len).max().unwrap_or(0);
        for depth in 0..deepest {
            for chain in &chains {
                let Some(&candidate) = chain.get(depth) else {
                    continue;
                };
                if voting
                    .iter()
                    .all(|&b| self.coercible(b, candidate, Sort::Strong, regime))
                {
                    return Some(candidate);
                }
            }
        }

        // Fall back to the united mode over the deflexed branches.
        let mut members: Vec<ModeId> = Vec::new();
        for &b in &voting {
            let deflexed = self.make_deflexed(b);
            for m in flatten_union(self, &[deflexed]) {
                if !members.iter().any(|&k| self.modes_equivalent(k, m)) {
                    members.push(m);
                }
            }
        }
        let union = self.union_of(members);
        if voting
            .iter()
            .all(|&b| self.coercible(b, union, Sort::Strong, regime))
        {
            Some(union)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_branches_balance_to_themselves() {
        let mut t = ModeTable::new();
        let balanced = t
            .balance(&[t.int_mode, t.int_mode], DeflexRegime::Safe)
            .unwrap();
        assert_eq!(balanced, t.int_mode);
    }

    #[test]
    fn skip_branches_do_not_vote() {
        let mut t = ModeTable::new();
        let balanced = t
            .balance(&[t.real_mode, t.hip_mode], DeflexRegime::Safe)
            .unwrap();
        assert_eq!(balanced, t.real_mode);
    }

    #[test]
    fn name_and_value_balance_to_the_value() {
        let mut t = ModeTable::new();
        let ref_int = t.reference_to(t.int_mode);
        // One branch REF INT, one branch INT: only INT suits both strongly.
        let balanced = t
            .balance(&[ref_int, t.int_mode], DeflexRegime::Safe)
            .unwrap();
        assert_eq!(balanced, t.int_mode);
    }

    #[test]
    fn int_and_real_balance_to_real() {
        let mut t = ModeTable::new();
        let balanced = t
            .balance(&[t.int_mode, t.real_mode], DeflexRegime::Safe)
            .unwrap();
        assert_eq!(balanced, t.real_mode);
    }

    #[test]
    fn unrelated_branches_unite() {
        let mut t = ModeTable::new();
        let balanced = t
            .balance(&[t.bool_mode, t.char_mode], DeflexRegime::Safe)
            .unwrap();
        let members = t.members_of(balanced).unwrap();
        assert_eq!(members.len(), 2);
    }
}
