//! Dominator tree over a function's basic blocks.
//!
//! The recover block has no CFG predecessors; it is treated as an extra
//! successor of the entry block so that it (and everything it dominates) is
//! part of the tree and gets lowered.

use super::Function;

#[derive(Debug, Clone)]
pub struct DomTree {
    idom: Vec<Option<usize>>,
    children: Vec<Vec<usize>>,
    preorder: Vec<usize>,
}

impl DomTree {
    pub fn compute(f: &Function) -> Self {
        let n = f.blocks.len();
        if n == 0 {
            return DomTree { idom: vec![], children: vec![], preorder: vec![] };
        }
        let succs = |b: usize| -> Vec<usize> {
            let mut s = f.blocks[b].succs.clone();
            if b == 0 {
                if let Some(r) = f.recover {
                    s.push(r);
                }
            }
            s
        };

        let rpo = reverse_postorder(n, &succs);
        let mut rpo_index = vec![usize::MAX; n];
        for (i, &b) in rpo.iter().enumerate() {
            rpo_index[b] = i;
        }

        let mut preds: Vec<Vec<usize>> = vec![Vec::new(); n];
        for &b in &rpo {
            for s in succs(b) {
                if s < n && rpo_index[s] != usize::MAX {
                    preds[s].push(b);
                }
            }
        }

        fn intersect(mut b1: usize, mut b2: usize, idom: &[Option<usize>], rpo_index: &[usize]) -> usize {
            while b1 != b2 {
                while rpo_index[b1] > rpo_index[b2] {
                    b1 = idom[b1].unwrap_or(0);
                }
                while rpo_index[b2] > rpo_index[b1] {
                    b2 = idom[b2].unwrap_or(0);
                }
            }
            b1
        }

        let mut idom: Vec<Option<usize>> = vec![None; n];
        idom[0] = Some(0);
        let mut changed = true;
        while changed {
            changed = false;
            for &b in rpo.iter().skip(1) {
                let mut it = preds[b].iter().copied().filter(|&p| idom[p].is_some());
                let Some(mut new_idom) = it.next() else {
                    continue;
                };
                for p in it {
                    new_idom = intersect(p, new_idom, &idom, &rpo_index);
                }
                if idom[b] != Some(new_idom) {
                    idom[b] = Some(new_idom);
                    changed = true;
                }
            }
        }

        let mut children = vec![Vec::new(); n];
        for b in 1..n {
            if let Some(d) = idom[b] {
                if d != b {
                    children[d].push(b);
                }
            }
        }
        // Children in block-index order keeps the traversal deterministic.
        for c in &mut children {
            c.sort_unstable();
        }

        let mut preorder = Vec::with_capacity(n);
        let mut stack = vec![0usize];
        while let Some(b) = stack.pop() {
            preorder.push(b);
            for &c in children[b].iter().rev() {
                stack.push(c);
            }
        }

        DomTree { idom, children, preorder }
    }

    /// Blocks reachable from the entry (or the recover block) in dominator-tree
    /// preorder: every block appears after its immediate dominator.
    pub fn preorder(&self) -> &[usize] {
        &self.preorder
    }

    pub fn idom(&self, b: usize) -> Option<usize> {
        match self.idom.get(b).copied().flatten() {
            Some(d) if d != b => Some(d),
            _ => None,
        }
    }

    pub fn children(&self, b: usize) -> &[usize] {
        &self.children[b]
    }

    pub fn is_reachable(&self, b: usize) -> bool {
        self.idom.get(b).copied().flatten().is_some()
    }

    pub fn dominates(&self, a: usize, mut b: usize) -> bool {
        if !self.is_reachable(b) {
            return false;
        }
        loop {
            if a == b {
                return true;
            }
            match self.idom(b) {
                Some(d) => b = d,
                None => return false,
            }
        }
    }
}

fn reverse_postorder(n: usize, succs: &dyn Fn(usize) -> Vec<usize>) -> Vec<usize> {
    let mut seen = vec![false; n];
    let mut post = Vec::with_capacity(n);
    let mut stack: Vec<(usize, Vec<usize>, usize)> = vec![(0, succs(0), 0)];
    seen[0] = true;
    while let Some((b, ss, i)) = stack.last_mut() {
        if *i < ss.len() {
            let s = ss[*i];
            *i += 1;
            if s < n && !seen[s] {
                seen[s] = true;
                let next = succs(s);
                stack.push((s, next, 0));
            }
        } else {
            post.push(*b);
            stack.pop();
        }
    }
    post.reverse();
    post
}
