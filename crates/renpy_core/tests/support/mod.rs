#![allow(dead_code)]

//! Builds small pickle payloads shaped like Ren'Py saves.

pub struct PickleWriter {
    protocol: u8,
    body: Vec<u8>,
    next_memo: u32,
}

impl PickleWriter {
    pub fn new(protocol: u8) -> Self {
        Self {
            protocol,
            body: Vec::new(),
            next_memo: 0,
        }
    }

    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.body.extend_from_slice(bytes);
        self
    }

    fn line(&mut self, op: u8, text: &str) -> &mut Self {
        self.body.push(op);
        self.body.extend_from_slice(text.as_bytes());
        self.body.push(b'\n');
        self
    }

    pub fn mark(&mut self) -> &mut Self {
        self.raw(b"(")
    }

    pub fn empty_dict(&mut self) -> &mut Self {
        if self.protocol == 0 {
            self.raw(b"(d")
        } else {
            self.raw(b"}")
        }
    }

    pub fn empty_list(&mut self) -> &mut Self {
        if self.protocol == 0 {
            self.raw(b"(l")
        } else {
            self.raw(b"]")
        }
    }

    pub fn setitem(&mut self) -> &mut Self {
        self.raw(b"s")
    }

    pub fn append(&mut self) -> &mut Self {
        self.raw(b"a")
    }

    /// Close the innermost MARK into a tuple.
    pub fn tuple_from_mark(&mut self) -> &mut Self {
        self.raw(b"t")
    }

    pub fn reduce(&mut self) -> &mut Self {
        self.raw(b"R")
    }

    pub fn global(&mut self, module: &str, name: &str) -> &mut Self {
        self.body.push(b'c');
        self.body.extend_from_slice(module.as_bytes());
        self.body.push(b'\n');
        self.body.extend_from_slice(name.as_bytes());
        self.body.push(b'\n');
        self
    }

    pub fn text(&mut self, s: &str) -> &mut Self {
        let bytes = s.as_bytes();
        match self.protocol {
            0 => {
                assert!(s.is_ascii() && !s.contains('\\') && !s.contains('\n'));
                self.line(b'V', s)
            }
            4..=255 if bytes.len() <= 255 => {
                self.body.push(0x8c);
                self.body.push(bytes.len() as u8);
                self.raw(bytes)
            }
            _ => {
                self.body.push(b'X');
                self.body.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                self.raw(bytes)
            }
        }
    }

    /// Python 2 `str` literal.
    pub fn byte_string(&mut self, s: &[u8]) -> &mut Self {
        assert!(s.len() <= 255);
        self.body.push(b'U');
        self.body.push(s.len() as u8);
        self.raw(s)
    }

    pub fn int(&mut self, v: i64) -> &mut Self {
        if self.protocol == 0 {
            return self.line(b'I', &v.to_string());
        }
        if let Ok(b) = u8::try_from(v) {
            self.raw(&[b'K', b])
        } else if let Ok(w) = u16::try_from(v) {
            self.body.push(b'M');
            self.raw(&w.to_le_bytes())
        } else {
            self.body.push(b'J');
            self.raw(&(v as i32).to_le_bytes())
        }
    }

    pub fn boolean(&mut self, v: bool) -> &mut Self {
        if self.protocol >= 2 {
            self.raw(&[if v { 0x88 } else { 0x89 }])
        } else {
            self.line(b'I', if v { "01" } else { "00" })
        }
    }

    pub fn float(&mut self, v: f64) -> &mut Self {
        if self.protocol == 0 {
            return self.line(b'F', &format!("{v:?}"));
        }
        self.body.push(b'G');
        self.raw(&v.to_be_bytes())
    }

    /// Memoize the top of the stack, returning its ordinal.
    pub fn put(&mut self) -> u32 {
        let ordinal = self.next_memo;
        self.next_memo += 1;
        match self.protocol {
            0 => {
                self.line(b'p', &ordinal.to_string());
            }
            4..=255 => {
                self.body.push(0x94);
            }
            _ => {
                self.raw(&[b'q', ordinal as u8]);
            }
        }
        ordinal
    }

    pub fn get(&mut self, ordinal: u32) -> &mut Self {
        if self.protocol == 0 {
            self.line(b'g', &ordinal.to_string())
        } else {
            self.raw(&[b'h', ordinal as u8])
        }
    }

    /// Wrap the body with PROTO (protocol 2+), a FRAME (protocol 4+) and STOP.
    pub fn finish(&self) -> Vec<u8> {
        let mut out = Vec::new();
        if self.protocol >= 2 {
            out.extend_from_slice(&[0x80, self.protocol]);
        }
        if self.protocol >= 4 {
            out.push(0x95);
            out.extend_from_slice(&(self.body.len() as u64 + 1).to_le_bytes());
        }
        out.extend_from_slice(&self.body);
        out.push(b'.');
        out
    }
}

/// `(roots, log)` where roots holds:
/// - `store.money = 100`
/// - `store._seen_intro = True`
/// - `store.player_name = "Eileen"` (memoized)
/// - `store.ratio = 0.5`
/// - `store.inventory = [1]`
/// - `store.rival` = backreference to the player name
/// and the log is an opaque `renpy.python.RollbackLog`.
pub fn sample_save(protocol: u8) -> Vec<u8> {
    let mut w = PickleWriter::new(protocol);
    w.mark();
    w.empty_dict();
    w.put();
    w.text("store.money").int(100).setitem();
    w.text("store._seen_intro").boolean(true).setitem();
    w.text("store.player_name").text("Eileen");
    let name = w.put();
    w.setitem();
    w.text("store.ratio").float(0.5).setitem();
    w.text("store.inventory").empty_list().int(1).append().setitem();
    w.text("store.rival").get(name).setitem();
    w.global("renpy.python", "RollbackLog")
        .mark()
        .tuple_from_mark()
        .reduce();
    w.tuple_from_mark();
    w.finish()
}
