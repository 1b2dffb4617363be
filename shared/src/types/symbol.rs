//! Symbol tables
//!
//! Symbol tables are built once from a kallsyms-style listing (or the output
//! of `nm -n`) and are read-only afterwards. Lookups answer "which symbol
//! starts at or below this address", which is how a text address is mapped
//! back to the function containing it.

use crate::error::ParseError;
use crate::utils::parse_hex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::BufRead;

/// Name reported for addresses no table can resolve
pub const UNKNOWN_SYMBOL: &str = "UNKNOWN";

/// Symbol type, using the single character alphabet of `nm` and `/proc/kallsyms`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SymbolKind {
    /// `t`: local text
    LocalText,
    /// `T`: global text
    GlobalText,
    /// `d` / `D`
    Data { global: bool },
    /// `b` / `B`
    Bss { global: bool },
    /// `r` / `R`
    ReadOnly { global: bool },
    /// `g` / `G`, `s` / `S`: small data and bss
    SmallData { global: bool },
    /// `a` / `A`
    Absolute { global: bool },
    /// `w` / `W`
    Weak { defined: bool },
    /// `v` / `V`
    WeakObject { defined: bool },
    /// `u` / `U`
    Undefined { unique: bool },
    /// `i` / `I`
    Indirect,
    /// `N` / `n`
    Debug,
    /// `p`
    StackUnwind,
    /// Anything outside the alphabet above
    Other(char),
    /// The empty kind carried by the `UNKNOWN` sentinel
    Unresolved,
}

impl SymbolKind {
    /// Map a kind character to its variant
    pub fn from_char(c: char) -> Self {
        match c {
            't' => SymbolKind::LocalText,
            'T' => SymbolKind::GlobalText,
            'd' | 'D' => SymbolKind::Data { global: c == 'D' },
            'b' | 'B' => SymbolKind::Bss { global: c == 'B' },
            'r' | 'R' => SymbolKind::ReadOnly { global: c == 'R' },
            'g' | 'G' => SymbolKind::SmallData { global: c == 'G' },
            's' | 'S' => SymbolKind::SmallData { global: c == 'S' },
            'a' | 'A' => SymbolKind::Absolute { global: c == 'A' },
            'w' | 'W' => SymbolKind::Weak { defined: c == 'W' },
            'v' | 'V' => SymbolKind::WeakObject { defined: c == 'V' },
            'u' => SymbolKind::Undefined { unique: true },
            'U' => SymbolKind::Undefined { unique: false },
            'i' | 'I' => SymbolKind::Indirect,
            'N' | 'n' => SymbolKind::Debug,
            'p' => SymbolKind::StackUnwind,
            other => SymbolKind::Other(other),
        }
    }

    /// Defined text symbols, local or global
    pub fn is_text(&self) -> bool {
        matches!(self, SymbolKind::LocalText | SymbolKind::GlobalText)
    }

    /// False only for the sentinel returned by failed lookups
    pub fn is_resolved(&self) -> bool {
        !matches!(self, SymbolKind::Unresolved)
    }
}

/// A single symbol table entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub address: u64,
    pub kind: SymbolKind,
    pub name: String,
}

impl Symbol {
    /// The sentinel returned for addresses below every entry of a table
    pub fn unknown(address: u64) -> Self {
        Self {
            address,
            kind: SymbolKind::Unresolved,
            name: UNKNOWN_SYMBOL.to_string(),
        }
    }
}

/// Inclusive address interval, `[low, high]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddrRange {
    pub low: u64,
    pub high: u64,
}

impl AddrRange {
    pub fn contains(&self, address: u64) -> bool {
        self.low <= address && address <= self.high
    }
}

/// Renders the `relevant_addr` control line format, `<low>-<high>`
impl fmt::Display for AddrRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}-{:x}", self.low, self.high)
    }
}

/// Symbols sorted ascending by address.
///
/// Equal addresses keep their input order, so the entry read last wins a
/// lookup for that address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
}

impl SymbolTable {
    /// Build a table from arbitrary entries, sorting them
    pub fn from_symbols(mut symbols: Vec<Symbol>) -> Self {
        // stable: later duplicates shadow earlier ones
        symbols.sort_by_key(|s| s.address);
        Self { symbols }
    }

    /// Parse `<hex-address> <kind> <name>` lines.
    ///
    /// Any line that does not split into exactly three whitespace-separated
    /// fields, blank lines included, rejects the whole listing.
    pub fn read<R: BufRead>(reader: R) -> Result<Self, ParseError> {
        let mut symbols = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let lineno = idx + 1;

            let parts: Vec<&str> = line.split_whitespace().collect();
            let [addr, kind, name] = parts.as_slice() else {
                return Err(ParseError::SymbolLine {
                    line: lineno,
                    content: line.clone(),
                });
            };

            let address = parse_hex(addr).ok_or_else(|| ParseError::InvalidAddress {
                line: lineno,
                content: addr.to_string(),
            })?;

            let mut chars = kind.chars();
            let kind = match (chars.next(), chars.next()) {
                (Some(c), None) => SymbolKind::from_char(c),
                _ => {
                    return Err(ParseError::SymbolKind {
                        line: lineno,
                        kind: kind.to_string(),
                    })
                }
            };

            symbols.push(Symbol {
                address,
                kind,
                name: name.to_string(),
            });
        }
        Ok(Self::from_symbols(symbols))
    }

    /// Convenience wrapper over [`SymbolTable::read`]
    pub fn parse_str(text: &str) -> Result<Self, ParseError> {
        Self::read(text.as_bytes())
    }

    /// Keep only defined text symbols (`t` and `T`)
    pub fn text_only(mut self) -> Self {
        self.symbols.retain(|s| s.kind.is_text());
        self
    }

    /// Merge the text symbols of another table into this one
    pub fn extend_text(&mut self, other: SymbolTable) {
        self.symbols
            .extend(other.symbols.into_iter().filter(|s| s.kind.is_text()));
        self.symbols.sort_by_key(|s| s.address);
    }

    /// Find the symbol with the greatest address `<= address`.
    ///
    /// Returns [`Symbol::unknown`] when `address` is below every entry.
    pub fn search(&self, address: u64) -> Symbol {
        let idx = self.symbols.partition_point(|s| s.address <= address);
        if idx == 0 {
            return Symbol::unknown(address);
        }
        self.symbols[idx - 1].clone()
    }

    /// Span from the lowest to the highest symbol address
    pub fn addr_range(&self) -> Option<AddrRange> {
        match (self.symbols.first(), self.symbols.last()) {
            (Some(first), Some(last)) => Some(AddrRange {
                low: first.address,
                high: last.address,
            }),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter()
    }
}

/// A symbol table together with the name it is reported under
#[derive(Debug, Clone)]
pub struct NamedTable {
    pub name: String,
    pub table: SymbolTable,
}

/// Symbol tables in resolution priority order.
///
/// Lookups try each table in the order it was added; the first table that
/// resolves an address wins. Since a table resolves every address at or
/// above its lowest symbol, the order matters whenever tables overlap.
#[derive(Debug, Clone, Default)]
pub struct SymbolTables {
    tables: Vec<NamedTable>,
}

impl SymbolTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a table with the lowest priority so far
    pub fn push(&mut self, name: impl Into<String>, table: SymbolTable) {
        self.tables.push(NamedTable {
            name: name.into(),
            table,
        });
    }

    /// Resolve `address` against every table in priority order.
    ///
    /// Returns the name of the table that resolved it, or `None` together
    /// with the `UNKNOWN` sentinel.
    pub fn resolve(&self, address: u64) -> (Option<&str>, Symbol) {
        for named in &self.tables {
            let sym = named.table.search(address);
            if sym.kind.is_resolved() {
                return (Some(named.name.as_str()), sym);
            }
        }
        (None, Symbol::unknown(address))
    }

    /// One range per non-empty table, in priority order
    pub fn relevant_ranges(&self) -> Vec<AddrRange> {
        self.tables
            .iter()
            .filter_map(|named| named.table.addr_range())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NamedTable> {
        self.tables.iter()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn foo_bar() -> SymbolTable {
        SymbolTable::parse_str("1000 T foo\n2000 t bar\n").unwrap()
    }

    #[test]
    fn test_search_resolves_nearest_below() {
        let table = foo_bar();

        assert_eq!(table.search(0x1500).name, "foo");
        assert_eq!(table.search(0x2500).name, "bar");
        assert_eq!(table.search(0x1000).name, "foo");
        assert_eq!(table.search(0x1fff).name, "foo");
    }

    #[test]
    fn test_search_below_minimum_is_unknown() {
        let table = foo_bar();
        let sym = table.search(0x500);

        assert_eq!(sym.name, UNKNOWN_SYMBOL);
        assert_eq!(sym.address, 0x500);
        assert!(!sym.kind.is_resolved());
    }

    #[test]
    fn test_search_is_monotonic() {
        let table = SymbolTable::parse_str(
            "ffffffff81000000 T _text\n\
             ffffffff81000100 t a\n\
             ffffffff81000400 t b\n\
             ffffffff81001000 T c\n",
        )
        .unwrap();

        let mut last = 0;
        for addr in (0xffffffff80fff000u64..0xffffffff81002000).step_by(0x80) {
            let found = table.search(addr).address;
            assert!(found >= last, "{:#x} resolved below previous lookup", addr);
            last = found;
        }
    }

    #[test]
    fn test_read_sorts_and_later_duplicate_wins() {
        let table = SymbolTable::parse_str("2000 T second\n1000 T first\n1000 t alias\n").unwrap();

        assert_eq!(table.len(), 3);
        assert_eq!(table.search(0x1000).name, "alias");
        assert_eq!(
            table.addr_range(),
            Some(AddrRange {
                low: 0x1000,
                high: 0x2000
            })
        );
    }

    #[test]
    fn test_read_rejects_wrong_field_count() {
        let err = SymbolTable::parse_str("1000 T foo\nffffffffc0000000 t mod_fn [kvm]\n").unwrap_err();
        assert!(matches!(err, ParseError::SymbolLine { line: 2, .. }));

        let err = SymbolTable::parse_str("1000 T\n").unwrap_err();
        assert!(matches!(err, ParseError::SymbolLine { line: 1, .. }));
    }

    #[test]
    fn test_read_rejects_blank_line() {
        let err = SymbolTable::parse_str("1000 T foo\n\n2000 t bar\n").unwrap_err();
        assert!(matches!(err, ParseError::SymbolLine { line: 2, .. }), "{err}");
    }

    #[test]
    fn test_read_rejects_bad_address_and_kind() {
        let err = SymbolTable::parse_str("xyz T foo\n").unwrap_err();
        assert!(matches!(err, ParseError::InvalidAddress { .. }));

        let err = SymbolTable::parse_str("1000 TT foo\n").unwrap_err();
        assert!(matches!(err, ParseError::SymbolKind { .. }));
    }

    #[test]
    fn test_text_only_filter() {
        let table = SymbolTable::parse_str(
            "1000 T text\n1100 d data\n1200 A abs\n1300 W weak\n1400 t local\n",
        )
        .unwrap()
        .text_only();

        let names: Vec<&str> = table.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["text", "local"]);
    }

    #[test]
    fn test_extend_text_merges_sorted() {
        let mut base = SymbolTable::parse_str("3000 T late\n").unwrap();
        base.extend_text(SymbolTable::parse_str("1000 T early\n2000 D data\n").unwrap());

        let names: Vec<&str> = base.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["early", "late"]);
    }

    #[test]
    fn test_tables_resolve_in_priority_order() {
        let mut tables = SymbolTables::new();
        tables.push("module", SymbolTable::parse_str("ffff0000 t mod_entry\n").unwrap());
        tables.push("kallsyms", SymbolTable::parse_str("1000 T start_kernel\n").unwrap());

        let (name, sym) = tables.resolve(0xffff0010);
        assert_eq!(name, Some("module"));
        assert_eq!(sym.name, "mod_entry");

        let (name, sym) = tables.resolve(0x1010);
        assert_eq!(name, Some("kallsyms"));
        assert_eq!(sym.name, "start_kernel");

        let (name, sym) = tables.resolve(0x10);
        assert_eq!(name, None);
        assert_eq!(sym.name, UNKNOWN_SYMBOL);
    }

    #[test]
    fn test_relevant_ranges_skip_empty_tables() {
        let mut tables = SymbolTables::new();
        tables.push("empty", SymbolTable::default());
        tables.push("foo_bar", foo_bar());

        let ranges = tables.relevant_ranges();
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].to_string(), "1000-2000");
        assert!(ranges[0].contains(0x1800));
        assert!(!ranges[0].contains(0x2001));
    }
}
